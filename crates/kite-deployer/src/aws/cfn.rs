//! CloudFormation stack lifecycle: submit, delete, and poll to a terminal
//! status.
//!
//! `poll` produces a stream of `(snapshot, error?)` events, terminating when
//! the stack reaches the desired terminal, reaches an incompatible terminal,
//! hits the deadline, or is cancelled. The last non-empty status reason is
//! carried into the eventual failure so the operator sees the real cause.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context as _, Result};
use aws_sdk_cloudformation::types::{Capability, OnFailure, Parameter, Tag};
use aws_sdk_cloudformation::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::AwsContext;
use super::error::{stack_not_exist, AwsError};

/// Terminal status a poll drives toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackGoal {
    CreateComplete,
    DeleteComplete,
}

impl StackGoal {
    pub fn status_str(self) -> &'static str {
        match self {
            StackGoal::CreateComplete => "CREATE_COMPLETE",
            StackGoal::DeleteComplete => "DELETE_COMPLETE",
        }
    }
}

/// Verdict of a single observed stack status against the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackVerdict {
    /// Keep polling.
    InProgress,
    /// The goal status was reached.
    ReachedGoal,
    /// A terminal incompatible with the goal was reached.
    FailedTerminal,
}

/// Classify an observed stack status against the desired terminal.
///
/// For create: any `ROLLBACK_*`, `DELETE_*`, or `CREATE_FAILED` status is a
/// failed terminal (a provider-initiated rollback still holds resources and
/// requires an explicit delete later). For delete: only `DELETE_FAILED`
/// fails; everything else keeps polling until `DELETE_COMPLETE`.
pub fn classify_status(current: &str, goal: StackGoal) -> StackVerdict {
    if current == goal.status_str() {
        return StackVerdict::ReachedGoal;
    }
    match goal {
        StackGoal::CreateComplete => {
            if current == "CREATE_FAILED"
                || current.starts_with("ROLLBACK_")
                || current.starts_with("DELETE_")
            {
                StackVerdict::FailedTerminal
            } else {
                StackVerdict::InProgress
            }
        }
        StackGoal::DeleteComplete => {
            if current == "DELETE_FAILED" {
                StackVerdict::FailedTerminal
            } else {
                StackVerdict::InProgress
            }
        }
    }
}

/// Point-in-time view of a stack.
#[derive(Debug, Clone, Default)]
pub struct StackSnapshot {
    pub stack_id: String,
    pub name: String,
    pub status: String,
    pub status_reason: String,
    pub outputs: HashMap<String, String>,
}

/// One emission of the poll stream.
#[derive(Debug)]
pub struct StackStatusEvent {
    pub stack: Option<StackSnapshot>,
    pub error: Option<anyhow::Error>,
}

/// CloudFormation client wrapper.
#[derive(Clone)]
pub struct CfnClient {
    client: Client,
}

impl CfnClient {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.cfn_client(),
        }
    }

    /// Submit a stack and return its id. Rollback on failure is disabled so
    /// a failed stack stays inspectable; teardown deletes it explicitly.
    pub async fn create_stack(
        &self,
        name: &str,
        template_body: &str,
        parameters: Vec<Parameter>,
        tags: Vec<Tag>,
    ) -> Result<String> {
        info!(stack_name = %name, "submitting stack");
        let out = self
            .client
            .create_stack()
            .stack_name(name)
            .template_body(template_body)
            .set_parameters(Some(parameters))
            .set_tags(Some(tags))
            .capabilities(Capability::CapabilityNamedIam)
            .on_failure(OnFailure::DoNothing)
            .send()
            .await
            .map_err(aws_sdk_cloudformation::Error::from)
            .context("Failed to create stack")?;
        out.stack_id()
            .map(str::to_string)
            .context("create-stack response carried no stack id")
    }

    /// Request stack deletion. Missing stacks are not an error here; the
    /// poll classifies them as already deleted.
    pub async fn delete_stack(&self, stack_id: &str) -> Result<()> {
        info!(stack_id = %stack_id, "requesting stack deletion");
        self.client
            .delete_stack()
            .stack_name(stack_id)
            .send()
            .await
            .map_err(aws_sdk_cloudformation::Error::from)
            .context("Failed to delete stack")?;
        Ok(())
    }

    /// Describe one stack.
    pub async fn describe_stack(&self, stack_id: &str) -> Result<StackSnapshot> {
        let out = self
            .client
            .describe_stacks()
            .stack_name(stack_id)
            .send()
            .await
            .map_err(aws_sdk_cloudformation::Error::from)
            .context("Failed to describe stack")?;
        let stacks = out.stacks();
        if stacks.len() != 1 {
            anyhow::bail!("expected exactly 1 stack for {stack_id}, got {}", stacks.len());
        }
        let s = &stacks[0];
        let mut outputs = HashMap::new();
        for o in s.outputs() {
            if let (Some(k), Some(v)) = (o.output_key(), o.output_value()) {
                outputs.insert(k.to_string(), v.to_string());
            }
        }
        Ok(StackSnapshot {
            stack_id: s.stack_id().unwrap_or_default().to_string(),
            name: s.stack_name().unwrap_or_default().to_string(),
            status: s
                .stack_status()
                .map(|st| st.as_str().to_string())
                .unwrap_or_default(),
            status_reason: s.stack_status_reason().unwrap_or_default().to_string(),
            outputs,
        })
    }

    /// Poll `stack_id` until it reaches `goal`, a failed terminal, the
    /// deadline, or cancellation. The first describe happens immediately so
    /// an already-terminal stack closes the stream without waiting.
    pub fn poll(
        &self,
        stack_id: String,
        goal: StackGoal,
        cancel: CancellationToken,
        initial_wait: Duration,
        poll_interval: Duration,
        timeout: Duration,
    ) -> mpsc::Receiver<StackStatusEvent> {
        let (tx, rx) = mpsc::channel(10);
        let client = self.clone();
        tokio::spawn(async move {
            client
                .poll_task(tx, stack_id, goal, cancel, initial_wait, poll_interval, timeout)
                .await;
        });
        rx
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll_task(
        &self,
        tx: mpsc::Sender<StackStatusEvent>,
        stack_id: String,
        goal: StackGoal,
        cancel: CancellationToken,
        initial_wait: Duration,
        poll_interval: Duration,
        timeout: Duration,
    ) {
        let started = std::time::Instant::now();
        let mut interval = Duration::ZERO;
        let mut last_reason = String::new();
        let mut first = true;

        loop {
            if started.elapsed() >= timeout {
                let _ = tx
                    .send(StackStatusEvent {
                        stack: None,
                        error: Some(
                            AwsError::Cancelled(format!(
                                "deadline exceeded after {timeout:?} waiting for {} on {stack_id}",
                                goal.status_str()
                            ))
                            .into(),
                        ),
                    })
                    .await;
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(stack_id = %stack_id, "stack wait cancelled");
                    let _ = tx
                        .send(StackStatusEvent {
                            stack: None,
                            error: Some(AwsError::Cancelled("stack wait stopped".into()).into()),
                        })
                        .await;
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    // The very first poll is immediate in case the stack has
                    // already reached the desired status.
                    if interval.is_zero() {
                        interval = poll_interval;
                    }
                }
            }

            let snapshot = match self.describe_stack(&stack_id).await {
                Ok(s) => s,
                Err(err) => {
                    if stack_not_exist(&err) {
                        if goal == StackGoal::DeleteComplete {
                            info!(stack_id = %stack_id, "stack already deleted as desired");
                            let _ = tx.send(StackStatusEvent { stack: None, error: None }).await;
                        } else {
                            warn!(stack_id = %stack_id, "stack does not exist; aborting");
                            let _ = tx
                                .send(StackStatusEvent { stack: None, error: Some(err) })
                                .await;
                        }
                        return;
                    }
                    warn!(stack_id = %stack_id, error = %err, "describe stack failed; retrying");
                    if tx
                        .send(StackStatusEvent { stack: None, error: Some(err) })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    continue;
                }
            };

            if !snapshot.status_reason.is_empty() {
                last_reason = snapshot.status_reason.clone();
            }
            info!(
                stack_id = %stack_id,
                current = %snapshot.status,
                desired = goal.status_str(),
                reason = %snapshot.status_reason,
                "stack poll"
            );

            match classify_status(&snapshot.status, goal) {
                StackVerdict::FailedTerminal => {
                    let err = AwsError::StackTerminalUnexpected {
                        stack_id: stack_id.clone(),
                        status: snapshot.status.clone(),
                        desired: goal.status_str().to_string(),
                        reason: last_reason.clone(),
                    };
                    let _ = tx
                        .send(StackStatusEvent {
                            stack: Some(snapshot),
                            error: Some(err.into()),
                        })
                        .await;
                    return;
                }
                StackVerdict::ReachedGoal => {
                    info!(stack_id = %stack_id, status = %snapshot.status, "desired stack status reached");
                    let _ = tx
                        .send(StackStatusEvent {
                            stack: Some(snapshot),
                            error: None,
                        })
                        .await;
                    return;
                }
                StackVerdict::InProgress => {
                    if tx
                        .send(StackStatusEvent {
                            stack: Some(snapshot),
                            error: None,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            if first {
                first = false;
                info!(stack_id = %stack_id, wait = ?initial_wait, "initial settling wait");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx
                            .send(StackStatusEvent {
                                stack: None,
                                error: Some(AwsError::Cancelled("stack wait stopped".into()).into()),
                            })
                            .await;
                        return;
                    }
                    _ = tokio::time::sleep(initial_wait) => {}
                }
            }
        }
    }

    /// Drain a poll stream, returning the final snapshot on success.
    pub async fn wait_for(
        &self,
        stack_id: &str,
        goal: StackGoal,
        cancel: &CancellationToken,
        initial_wait: Duration,
        timeout: Duration,
    ) -> Result<Option<StackSnapshot>> {
        let mut rx = self.poll(
            stack_id.to_string(),
            goal,
            cancel.clone(),
            initial_wait,
            DEFAULT_POLL_INTERVAL,
            timeout,
        );
        let mut last: Option<StackSnapshot> = None;
        let mut last_err: Option<anyhow::Error> = None;
        while let Some(event) = rx.recv().await {
            if let Some(s) = event.stack {
                last = Some(s);
            }
            last_err = event.error;
        }
        match last_err {
            None => Ok(last),
            Some(e) => Err(e),
        }
    }
}

/// Fixed poll interval for stack waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Build a CloudFormation parameter.
pub fn param(key: &str, value: &str) -> Parameter {
    Parameter::builder()
        .parameter_key(key)
        .parameter_value(value)
        .build()
}

/// Build CloudFormation tags from key/value pairs.
pub fn tags(pairs: &[(&str, &str)]) -> Result<Vec<Tag>> {
    pairs
        .iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(*k)
                .value(*v)
                .build()
                .context("Failed to build stack tag")
        })
        .collect()
}

/// Read exactly the expected output keys from a snapshot. An unexpected key
/// is a configuration error (the template and the reader disagree), and a
/// missing key is an error too.
pub fn extract_outputs(
    snapshot: &StackSnapshot,
    expected: &[&str],
) -> Result<HashMap<String, String>> {
    for key in snapshot.outputs.keys() {
        if !expected.contains(&key.as_str()) {
            anyhow::bail!(
                "unexpected output key {key:?} in stack {} (expected one of {expected:?})",
                snapshot.name
            );
        }
    }
    let mut out = HashMap::new();
    for key in expected {
        let v = snapshot
            .outputs
            .get(*key)
            .with_context(|| format!("stack {} missing output key {key:?}", snapshot.name))?;
        out.insert((*key).to_string(), v.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_goal_classification() {
        use StackGoal::CreateComplete as G;
        assert_eq!(classify_status("CREATE_COMPLETE", G), StackVerdict::ReachedGoal);
        assert_eq!(classify_status("CREATE_IN_PROGRESS", G), StackVerdict::InProgress);
        assert_eq!(classify_status("REVIEW_IN_PROGRESS", G), StackVerdict::InProgress);
        assert_eq!(classify_status("CREATE_FAILED", G), StackVerdict::FailedTerminal);
        assert_eq!(classify_status("ROLLBACK_IN_PROGRESS", G), StackVerdict::FailedTerminal);
        assert_eq!(classify_status("ROLLBACK_COMPLETE", G), StackVerdict::FailedTerminal);
        assert_eq!(classify_status("ROLLBACK_FAILED", G), StackVerdict::FailedTerminal);
        assert_eq!(classify_status("DELETE_COMPLETE", G), StackVerdict::FailedTerminal);
        assert_eq!(classify_status("DELETE_IN_PROGRESS", G), StackVerdict::FailedTerminal);
    }

    #[test]
    fn delete_goal_classification() {
        use StackGoal::DeleteComplete as G;
        assert_eq!(classify_status("DELETE_COMPLETE", G), StackVerdict::ReachedGoal);
        assert_eq!(classify_status("DELETE_IN_PROGRESS", G), StackVerdict::InProgress);
        assert_eq!(classify_status("DELETE_FAILED", G), StackVerdict::FailedTerminal);
        // A stack still rolling back keeps polling on the delete path.
        assert_eq!(classify_status("ROLLBACK_COMPLETE", G), StackVerdict::InProgress);
        assert_eq!(classify_status("CREATE_COMPLETE", G), StackVerdict::InProgress);
    }

    #[test]
    fn extract_outputs_rejects_unexpected_keys() {
        let mut snapshot = StackSnapshot {
            name: "s".into(),
            ..Default::default()
        };
        snapshot.outputs.insert("RoleARN".into(), "arn:x".into());

        let got = extract_outputs(&snapshot, &["RoleARN"]).unwrap();
        assert_eq!(got["RoleARN"], "arn:x");

        snapshot
            .outputs
            .insert("Surprise".into(), "value".into());
        let err = extract_outputs(&snapshot, &["RoleARN"]).unwrap_err();
        assert!(err.to_string().contains("unexpected output key"));
    }

    #[test]
    fn extract_outputs_requires_all_expected() {
        let snapshot = StackSnapshot {
            name: "s".into(),
            ..Default::default()
        };
        let err = extract_outputs(&snapshot, &["VPCID"]).unwrap_err();
        assert!(err.to_string().contains("missing output key"));
    }
}
