//! Readiness waiting with exponential backoff and cancellation support.
//!
//! Provides a generic abstraction for waiting on AWS resources (or any async
//! condition) to become ready, with configurable exponential backoff and a
//! single cancellation primitive multiplexing deadline, caller stop, and
//! OS signal.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for resource waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
        }
    }
}

/// A token that is cancelled on Ctrl-C. The deployer threads it through
/// every long-running operation; deadlines and caller stops layer on top by
/// cancelling child tokens.
pub fn signal_cancel_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}

/// Wait for a resource to become ready with exponential backoff.
///
/// `check` returns `Ok(true)` when ready, `Ok(false)` to retry; an `Err`
/// aborts the wait. Cancellation is honored before every attempt and during
/// every sleep.
pub async fn wait_for<F, Fut>(
    config: WaitConfig,
    cancel: &CancellationToken,
    check: F,
    resource_name: &str,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = std::time::Instant::now();
    let mut attempts = 0u32;

    let backoff = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();
    let mut delays = backoff.into_iter();

    loop {
        attempts += 1;

        if cancel.is_cancelled() {
            anyhow::bail!("wait for {} cancelled", resource_name);
        }
        if start.elapsed() >= config.timeout {
            anyhow::bail!(
                "timeout waiting for {} after {:?} ({} attempts)",
                resource_name,
                config.timeout,
                attempts
            );
        }

        match check().await {
            Ok(true) => {
                debug!(resource = %resource_name, attempts, "resource ready");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "resource not ready, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        anyhow::bail!("wait for {} cancelled", resource_name);
                    }
                }
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "resource check failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn ready_on_first_check() {
        let token = CancellationToken::new();
        wait_for(
            WaitConfig::default(),
            &token,
            || async { Ok(true) },
            "immediate",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn retries_until_ready() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        wait_for(
            WaitConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                timeout: Duration::from_secs(5),
            },
            &token,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n >= 2)
            },
            "third-time",
        )
        .await
        .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_wait() {
        let token = CancellationToken::new();
        token.cancel();
        let err = wait_for(
            WaitConfig::default(),
            &token,
            || async { Ok(false) },
            "never",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let token = CancellationToken::new();
        let err = wait_for(
            WaitConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                timeout: Duration::from_millis(20),
            },
            &token,
            || async { Ok(false) },
            "stuck",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timeout waiting for stuck"));
    }

    #[tokio::test]
    async fn check_error_propagates() {
        let token = CancellationToken::new();
        let err = wait_for(
            WaitConfig::default(),
            &token,
            || async { anyhow::bail!("boom") },
            "erroring",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
