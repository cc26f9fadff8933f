//! Per-node kubelet log collection.
//!
//! Fetches `journalctl -u kubelet.service` from every instance over SSH,
//! writes each to the plan's log directory, records the paths in the plan,
//! and uploads to the artifact bucket when one exists. Per-instance
//! failures are collected into one compound error without stopping the
//! sweep.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use kite_config::Plan;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::aws::S3Client;
use crate::compound_error;
use crate::retry::RetryPolicy;
use crate::ssh::{RemoteShell, SshConfig};

/// Fetch kubelet logs from every instance of every ASG.
pub async fn fetch_logs(plan: &mut Plan, s3: Option<&S3Client>) -> Result<()> {
    std::fs::create_dir_all(&plan.asgs_logs_dir).context("Failed to create logs dir")?;
    let key_path = plan.remote_access.private_key_path.clone();
    let logs_dir = PathBuf::from(&plan.asgs_logs_dir);

    let mut set: JoinSet<Result<(String, String, PathBuf)>> = JoinSet::new();
    for asg in plan.asgs.values() {
        let asg_dir = logs_dir.join(&asg.name);
        std::fs::create_dir_all(&asg_dir).context("Failed to create ASG log dir")?;
        for inst in asg.instances.values() {
            let cfg = SshConfig {
                host: inst.public_ip.clone(),
                user: asg.remote_access_user_name.clone(),
                key_path: key_path.clone(),
            };
            let asg_name = asg.name.clone();
            let id = inst.instance_id.clone();
            let path = asg_dir.join(format!("{id}-kubelet.log"));
            set.spawn(async move {
                let out = fetch_one(cfg, &path).await.with_context(|| {
                    format!("failed to fetch kubelet log from {id}")
                })?;
                info!(instance_id = %id, bytes = out, path = %path.display(), "fetched kubelet log");
                Ok((asg_name, id, path))
            });
        }
    }

    let mut errors = Vec::new();
    let mut fetched: Vec<(String, String, PathBuf)> = Vec::new();
    while let Some(res) = set.join_next().await {
        match res.context("log fetch task panicked")? {
            Ok(entry) => fetched.push(entry),
            Err(e) => {
                warn!(error = %e, "log fetch failed");
                errors.push(e);
            }
        }
    }

    // Fold results into the plan sequentially; the deployer is the only
    // writer.
    let bucket = plan.s3.bucket_name.clone();
    let s3_dir = plan.s3_dir.clone();
    for (asg_name, instance_id, path) in fetched {
        if let Some(asg) = plan.asgs.get_mut(&asg_name) {
            asg.logs
                .entry(instance_id.clone())
                .or_default()
                .push(path.to_string_lossy().into_owned());
        }
        if let Some(s3) = s3 {
            let key = format!(
                "{s3_dir}/logs/{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );
            if let Err(e) = s3.upload_file(&bucket, &key, &path).await {
                warn!(instance_id = %instance_id, error = %e, "log upload failed");
                errors.push(e);
            }
        }
    }
    plan.sync()?;

    if errors.is_empty() {
        Ok(())
    } else {
        Err(compound_error("log collection", errors))
    }
}

/// Fetch one node's kubelet journal into `path`; returns the byte count.
async fn fetch_one(cfg: SshConfig, path: &Path) -> Result<usize> {
    let mut shell = RemoteShell::new(cfg);
    shell.connect(RetryPolicy::default()).await?;
    let out = shell
        .run(
            "sudo journalctl --no-pager -u kubelet.service",
            RetryPolicy::default(),
        )
        .await;
    shell.close().await;
    let out = out?;
    std::fs::write(path, &out).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(out.len())
}
