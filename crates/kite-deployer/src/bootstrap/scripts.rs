//! Rendered shell wrappers and readiness predicates for node bootstrap.

use kite_config::PLUGIN_READY_SENTINEL;

/// Well-known init log location on the primary.
pub const INIT_LOG_PATH: &str = "/var/log/kubeadm-init.log";

/// Marker lines a successful worker join prints.
pub const JOIN_CONNECTED_MARKER: &str =
    "[discovery] Successfully established connection with API Server";
pub const JOIN_DONE_MARKER: &str = "This node has joined the cluster";

/// Render the init wrapper run on the primary. Runs `kubeadm init`,
/// redirects everything to the well-known log, and installs the admin
/// kubeconfig for the login user.
pub fn init_script(user: &str, advertise_ip: &str, pod_network_cidr: &str) -> String {
    format!(
        r#"#!/bin/bash
set -x

sudo kubeadm init \
  --apiserver-advertise-address {advertise_ip} \
  --pod-network-cidr {pod_network_cidr} \
  --token-ttl 0 > {INIT_LOG_PATH} 2>&1

mkdir -p /home/{user}/.kube
sudo cp -f /etc/kubernetes/admin.conf /home/{user}/.kube/config
sudo chown {user}:{user} /home/{user}/.kube/config
"#
    )
}

/// Remote path the init wrapper is uploaded to.
pub fn init_script_remote_path(user: &str) -> String {
    format!("/home/{user}/kubeadm.init.sh")
}

/// `kubectl` against the admin kubeconfig installed by the init wrapper.
pub fn kubectl_command(user: &str, args: &str) -> String {
    format!("kubectl --kubeconfig=/home/{user}/.kube/config {args}")
}

/// Readiness predicate for a node's cloud-init log: either cloud-init
/// reports completion or the plugin sentinel was emitted.
pub fn cloud_init_ready(log: &str) -> bool {
    log.contains(PLUGIN_READY_SENTINEL)
        || log
            .lines()
            .any(|l| l.contains("Cloud-init v. ") && l.contains(" finished at "))
}

/// True when a worker's join output proves the node joined.
pub fn join_succeeded(output: &str) -> bool {
    output.contains(JOIN_CONNECTED_MARKER) && output.contains(JOIN_DONE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_script_redirects_to_well_known_log() {
        let script = init_script("ec2-user", "10.0.1.5", "10.244.0.0/16");
        assert!(script.contains("--apiserver-advertise-address 10.0.1.5"));
        assert!(script.contains("--pod-network-cidr 10.244.0.0/16"));
        assert!(script.contains(INIT_LOG_PATH));
        assert!(script.contains("/home/ec2-user/.kube/config"));
    }

    #[test]
    fn cloud_init_readiness_both_forms() {
        assert!(cloud_init_ready(
            "Cloud-init v. 19.3-46.amzn2 finished at Mon, 06 Jan 2020 01:02:03 +0000"
        ));
        assert!(cloud_init_ready(&format!("boot...\n{PLUGIN_READY_SENTINEL}\n")));
        assert!(!cloud_init_ready("Cloud-init v. 19.3 running 'modules:final'"));
        assert!(!cloud_init_ready(""));
    }

    #[test]
    fn join_success_requires_both_markers() {
        let ok = format!("{JOIN_CONNECTED_MARKER}\n...\n{JOIN_DONE_MARKER}:\n");
        assert!(join_succeeded(&ok));
        assert!(!join_succeeded(JOIN_CONNECTED_MARKER));
        assert!(!join_succeeded(JOIN_DONE_MARKER));
    }
}
