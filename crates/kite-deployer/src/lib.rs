//! kite-deployer - phased EC2 + kubeadm cluster deployer
//!
//! Consumes a validated [`kite_config::Plan`] and drives it through the
//! create phases (bucket, role, VPC, key pair, ASGs, SSM documents),
//! bootstraps Kubernetes with kubeadm over SSH, publishes an API load
//! balancer, collects node logs, and tears everything down in reverse.
//!
//! ## Modules
//!
//! - [`aws`]: service clients, stack poller, and error classification
//! - [`deploy`]: the phase engine with rollback
//! - [`bootstrap`]: kubeadm init/join over SSH
//! - [`ssh`]: scoped remote shell over the system OpenSSH binaries
//! - [`logs`]: per-node kubelet log collection
//! - [`retry`] / [`wait`]: retry policy and cancellable readiness waits

pub mod aws;
pub mod bootstrap;
pub mod deploy;
pub mod logs;
pub mod retry;
pub mod ssh;
pub mod templates;
pub mod wait;

pub use deploy::{CreateOutcome, Deployer};
pub use retry::RetryPolicy;

/// Join best-effort failures into one error that names every cause.
pub(crate) fn compound_error(what: &str, errors: Vec<anyhow::Error>) -> anyhow::Error {
    let joined = errors
        .iter()
        .map(|e| format!("{e:#}"))
        .collect::<Vec<_>>()
        .join("; ");
    anyhow::anyhow!("{what}: {} error(s): {joined}", errors.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_error_names_every_cause() {
        let err = compound_error(
            "teardown",
            vec![anyhow::anyhow!("first failure"), anyhow::anyhow!("second failure")],
        );
        let s = err.to_string();
        assert!(s.starts_with("teardown: 2 error(s):"));
        assert!(s.contains("first failure"));
        assert!(s.contains("second failure"));
    }
}
