//! SSM document execution across ASG instances.
//!
//! The document itself is created through a CloudFormation stack; this
//! client only invokes it and polls every invocation to a terminal status.

use std::time::Duration;

use anyhow::{Context as _, Result};
use aws_sdk_ssm::types::CommandInvocationStatus;
use aws_sdk_ssm::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::AwsContext;
use crate::wait::{wait_for, WaitConfig};

/// SSM client for running per-ASG provisioning documents.
#[derive(Clone)]
pub struct SsmClient {
    client: Client,
}

impl SsmClient {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ssm_client(),
        }
    }

    /// Invoke `document_name` on the given instances. Returns the command id.
    pub async fn send_command(
        &self,
        document_name: &str,
        instance_ids: &[String],
        timeout_seconds: i64,
        output_bucket: Option<&str>,
        output_prefix: &str,
    ) -> Result<String> {
        info!(
            document = %document_name,
            instances = instance_ids.len(),
            "sending SSM command"
        );
        let mut req = self
            .client
            .send_command()
            .document_name(document_name)
            .set_instance_ids(Some(instance_ids.to_vec()))
            .timeout_seconds(timeout_seconds as i32);
        if let Some(bucket) = output_bucket {
            req = req
                .output_s3_bucket_name(bucket)
                .output_s3_key_prefix(output_prefix);
        }
        let out = req
            .send()
            .await
            .map_err(aws_sdk_ssm::Error::from)
            .context("Failed to send SSM command")?;
        out.command()
            .and_then(|c| c.command_id())
            .map(str::to_string)
            .context("send-command response carried no command id")
    }

    /// Wait until every invocation of `command_id` reaches a terminal
    /// status; any failed invocation fails the wait.
    pub async fn wait_for_command(
        &self,
        command_id: &str,
        instance_ids: &[String],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<()> {
        for instance_id in instance_ids {
            let client = self.client.clone();
            let cmd = command_id.to_string();
            let inst = instance_id.clone();
            wait_for(
                WaitConfig {
                    initial_delay: Duration::from_secs(5),
                    max_delay: Duration::from_secs(30),
                    timeout,
                },
                cancel,
                || {
                    let client = client.clone();
                    let cmd = cmd.clone();
                    let inst = inst.clone();
                    async move {
                        let out = client
                            .get_command_invocation()
                            .command_id(&cmd)
                            .instance_id(&inst)
                            .send()
                            .await
                            .map_err(aws_sdk_ssm::Error::from)
                            .context("Failed to get command invocation")?;
                        match out.status() {
                            Some(CommandInvocationStatus::Success) => Ok(true),
                            Some(
                                CommandInvocationStatus::Failed
                                | CommandInvocationStatus::Cancelled
                                | CommandInvocationStatus::TimedOut,
                            ) => {
                                let detail = out.status_details().unwrap_or_default();
                                anyhow::bail!(
                                    "SSM invocation {cmd} failed on {inst}: {detail}"
                                )
                            }
                            other => {
                                if other.is_none() {
                                    warn!(command = %cmd, instance = %inst, "invocation not visible yet");
                                }
                                Ok(false)
                            }
                        }
                    }
                },
                &format!("SSM invocation on {instance_id}"),
            )
            .await?;
        }
        Ok(())
    }
}
