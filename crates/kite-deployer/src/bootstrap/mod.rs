//! Kubeadm cluster bootstrap over SSH.
//!
//! Drives the state machine
//! `created -> node-ready -> init-running -> join-ready -> node-joined`
//! across the inventory: picks a primary on the control-plane ASG, runs
//! `kubeadm init` there, scrapes the join command out of the init log,
//! joins every worker in parallel, then fetches the admin kubeconfig.

pub mod scripts;
pub mod token;

use std::time::Duration;

use anyhow::{Context as _, Result};
use kite_config::{Instance, Plan};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use crate::ssh::{RemoteShell, SshConfig};

/// Budget for extracting the join token from the init log.
pub const JOIN_TOKEN_TIMEOUT: Duration = Duration::from_secs(600);
/// Interval between init-log scrapes.
pub const LOG_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Budget for a node's cloud-init readiness.
pub const NODE_READY_TIMEOUT: Duration = Duration::from_secs(600);
/// Budget for the API server answering `kubectl get nodes`.
pub const API_READY_TIMEOUT: Duration = Duration::from_secs(600);
/// Pod network range handed to `kubeadm init`.
pub const POD_NETWORK_CIDR: &str = "10.244.0.0/16";

/// Short per-call policy for log scrapes and small commands.
fn scrape_policy() -> RetryPolicy {
    RetryPolicy::new(15, Duration::from_secs(5), Duration::from_secs(15 * 20))
}

/// Bring the cluster up on the already-provisioned inventory and populate
/// the plan's kubeadm sub-plan. The plan is synced after every milestone.
pub async fn bootstrap_cluster(plan: &mut Plan, cancel: &CancellationToken) -> Result<()> {
    let key_path = plan.remote_access.private_key_path.clone();

    let cp_asg = plan
        .control_plane_asg()
        .context("no ASGs configured")?
        .clone();
    let primary = cp_asg
        .instances
        .values()
        .find(|i| !i.public_ip.is_empty())
        .context("control-plane ASG has no instance with a public IP")?
        .clone();
    let user = cp_asg.remote_access_user_name.clone();

    // Every node must finish cloud-init before kubeadm can run.
    wait_all_nodes_ready(plan, &key_path, cancel).await?;
    plan.record_status("bootstrap: all nodes ready")?;

    plan.kubeadm.join_target = format!("{}:6443", primary.private_ip);
    plan.record_status(format!(
        "bootstrap: running kubeadm init on {}",
        primary.instance_id
    ))?;

    let mut master = RemoteShell::new(SshConfig {
        host: primary.public_ip.clone(),
        user: user.clone(),
        key_path: key_path.clone(),
    });
    master.connect(RetryPolicy::default()).await?;

    run_init(&mut master, &user, &primary).await?;

    let join = extract_join_command(&mut master, cancel).await?;
    plan.kubeadm.join_token = join.token.clone();
    plan.kubeadm.join_discovery_token_ca_cert_hash = join.discovery_token_ca_cert_hash.clone();
    // The advertised target is authoritative; what the log printed is only
    // used for the token fields.
    let join = token::JoinCommand {
        target: plan.kubeadm.join_target.clone(),
        ..join
    };
    plan.record_status("bootstrap: join token extracted")?;

    wait_api_ready(&mut master, &user, cancel).await?;
    plan.record_status("bootstrap: API server responsive")?;

    let joined = join_workers(plan, &primary, &join, &key_path).await?;
    for instance_id in &joined {
        plan.record_status(format!("bootstrap: node {instance_id} joined"))?;
    }

    fetch_kubeconfig(&mut master, &plan.kubeadm.kubeconfig_path).await?;
    plan.record_status("bootstrap: kubeconfig fetched")?;

    master.close().await;
    Ok(())
}

/// Wait for cloud-init (or the plugin sentinel) on every instance, in
/// parallel.
async fn wait_all_nodes_ready(
    plan: &Plan,
    key_path: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut set: JoinSet<Result<String>> = JoinSet::new();
    for asg in plan.asgs.values() {
        for inst in asg.instances.values() {
            let cfg = SshConfig {
                host: inst.public_ip.clone(),
                user: asg.remote_access_user_name.clone(),
                key_path: key_path.to_string(),
            };
            let id = inst.instance_id.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let mut shell = RemoteShell::new(cfg);
                shell.connect(RetryPolicy::default()).await?;
                let out = probe_cloud_init(&mut shell, &cancel, &id).await;
                shell.close().await;
                out?;
                Ok(id)
            });
        }
    }
    while let Some(res) = set.join_next().await {
        let id = res.context("node readiness task panicked")??;
        info!(instance_id = %id, "node ready");
    }
    Ok(())
}

/// Poll one node's cloud-init log until the readiness predicate holds.
async fn probe_cloud_init(
    shell: &mut RemoteShell,
    cancel: &CancellationToken,
    instance_id: &str,
) -> Result<()> {
    let started = std::time::Instant::now();
    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("node readiness wait cancelled for {instance_id}");
        }
        if started.elapsed() >= NODE_READY_TIMEOUT {
            anyhow::bail!(
                "node {instance_id} not ready after {:?}",
                NODE_READY_TIMEOUT
            );
        }
        let out = shell
            .run("cat /var/log/cloud-init-output.log", scrape_policy())
            .await?;
        if scripts::cloud_init_ready(&String::from_utf8_lossy(&out)) {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            _ = cancel.cancelled() => {
                anyhow::bail!("node readiness wait cancelled for {instance_id}");
            }
        }
    }
}

/// Upload and start the init wrapper on the primary.
async fn run_init(master: &mut RemoteShell, user: &str, primary: &Instance) -> Result<()> {
    let script = scripts::init_script(user, &primary.private_ip, POD_NETWORK_CIDR);
    let local = std::env::temp_dir().join(format!("kubeadm-init-{}.sh", primary.instance_id));
    std::fs::write(&local, script).context("Failed to write init wrapper")?;
    let remote = scripts::init_script_remote_path(user);

    master
        .send(&local.to_string_lossy(), &remote, RetryPolicy::default())
        .await
        .context("Failed to upload init wrapper")?;
    let _ = std::fs::remove_file(&local);

    master
        .run(&format!("chmod +x {remote}"), RetryPolicy::default())
        .await?;
    // Backgrounded: the wrapper redirects into the well-known log and the
    // driver watches that instead of holding the session open.
    master
        .run(
            &format!("sudo bash {remote} > /dev/null 2>&1 &"),
            RetryPolicy::once(Duration::from_secs(15)),
        )
        .await?;
    info!(instance_id = %primary.instance_id, "kubeadm init started");
    Ok(())
}

/// Scrape the init log until the join command appears.
async fn extract_join_command(
    master: &mut RemoteShell,
    cancel: &CancellationToken,
) -> Result<token::JoinCommand> {
    let started = std::time::Instant::now();
    while started.elapsed() < JOIN_TOKEN_TIMEOUT {
        if cancel.is_cancelled() {
            anyhow::bail!("join token extraction cancelled");
        }
        let out = master
            .run(
                &format!("cat {}", scripts::INIT_LOG_PATH),
                scrape_policy(),
            )
            .await
            .unwrap_or_default();
        let log = String::from_utf8_lossy(&out);
        if let Some(join) = token::find_join_command(&log) {
            info!(target = %join.target, "kubeadm join command is ready");
            return Ok(join);
        }
        info!("waiting on kubeadm init");
        tokio::select! {
            _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            _ = cancel.cancelled() => anyhow::bail!("join token extraction cancelled"),
        }
    }
    anyhow::bail!(
        "no join token in {} after {:?}",
        scripts::INIT_LOG_PATH,
        JOIN_TOKEN_TIMEOUT
    )
}

/// Run the join command on every non-primary instance, in parallel.
/// Returns the joined instance ids.
async fn join_workers(
    plan: &Plan,
    primary: &Instance,
    join: &token::JoinCommand,
    key_path: &str,
) -> Result<Vec<String>> {
    let mut set: JoinSet<Result<String>> = JoinSet::new();
    for asg in plan.asgs.values() {
        for inst in asg.instances.values() {
            if inst.instance_id == primary.instance_id {
                continue;
            }
            let cfg = SshConfig {
                host: inst.public_ip.clone(),
                user: asg.remote_access_user_name.clone(),
                key_path: key_path.to_string(),
            };
            let id = inst.instance_id.clone();
            let cmd = join.command();
            set.spawn(async move {
                info!(instance_id = %id, "joining node");
                let mut shell = RemoteShell::new(cfg);
                shell.connect(RetryPolicy::default()).await?;
                let out = shell
                    .run(
                        &cmd,
                        RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(180)),
                    )
                    .await;
                shell.close().await;
                let out = out?;
                let output = String::from_utf8_lossy(&out);
                if !scripts::join_succeeded(&output) {
                    anyhow::bail!("node {id} failed to join: {output}");
                }
                Ok(id)
            });
        }
    }

    let mut joined = Vec::new();
    while let Some(res) = set.join_next().await {
        match res.context("join task panicked")? {
            Ok(id) => {
                info!(instance_id = %id, "node has joined the cluster");
                joined.push(id);
            }
            Err(e) => {
                warn!(error = %e, "node join failed");
                return Err(e);
            }
        }
    }
    joined.sort();
    Ok(joined)
}

/// Wait until `kubectl get nodes` answers on the primary.
async fn wait_api_ready(
    master: &mut RemoteShell,
    user: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = std::time::Instant::now();
    let cmd = scripts::kubectl_command(user, "get nodes");
    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("API readiness wait cancelled");
        }
        if started.elapsed() >= API_READY_TIMEOUT {
            anyhow::bail!("API server not responsive after {:?}", API_READY_TIMEOUT);
        }
        match master.run(&cmd, scrape_policy()).await {
            Ok(out) if String::from_utf8_lossy(&out).contains("Ready")
                || String::from_utf8_lossy(&out).contains("NotReady") =>
            {
                return Ok(())
            }
            Ok(_) => info!("API server up, nodes not listed yet"),
            Err(e) => info!(error = %e, "API server not responsive yet"),
        }
        tokio::select! {
            _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            _ = cancel.cancelled() => anyhow::bail!("API readiness wait cancelled"),
        }
    }
}

/// Download the admin kubeconfig to the local path, mode 0600.
async fn fetch_kubeconfig(master: &mut RemoteShell, local_path: &str) -> Result<()> {
    let out = master
        .run("sudo cat /etc/kubernetes/admin.conf", RetryPolicy::default())
        .await
        .context("Failed to read admin.conf")?;
    std::fs::write(local_path, &out).context("Failed to write kubeconfig")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(local_path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set kubeconfig permissions")?;
    }
    info!(path = %local_path, "kubeconfig fetched");
    Ok(())
}
