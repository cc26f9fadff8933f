//! Remote shell over the system OpenSSH binaries.
//!
//! A session is a real scoped resource: `connect` starts a ControlMaster
//! process holding the authenticated connection, `run`/`send`/`download`
//! multiplex over its socket, and `close` (also wired to `Drop`) tears the
//! master down. Every call takes a [`RetryPolicy`]; transport failures
//! reconnect and retry, a non-zero remote exit is an error that still
//! carries the combined output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// OpenSSH exit code for transport-level failure.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Errors from the remote shell.
#[derive(Debug, Error)]
pub enum SshError {
    /// Could not establish the session.
    #[error("failed to connect to {host} after {attempts} attempts: {last}")]
    Connect {
        host: String,
        attempts: u32,
        last: String,
    },

    /// The connection died mid-call and retries were exhausted.
    #[error("transport failure talking to {host}: {detail}")]
    Transport { host: String, detail: String },

    /// The remote process exited non-zero; combined output preserved.
    #[error("remote command exited with {code}: {}", String::from_utf8_lossy(output))]
    Command { code: i32, output: Vec<u8> },

    /// The per-call deadline elapsed.
    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    /// Local process spawn or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection parameters for one host.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Public IP or DNS name.
    pub host: String,
    /// Login user, e.g. "ec2-user".
    pub user: String,
    /// Private key path (mode 0600).
    pub key_path: String,
}

/// A scoped SSH session.
pub struct RemoteShell {
    cfg: SshConfig,
    control_path: PathBuf,
    connected: bool,
}

impl RemoteShell {
    pub fn new(cfg: SshConfig) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let control_path = std::env::temp_dir().join(format!("kite-ssh-{suffix}.sock"));
        Self {
            cfg,
            control_path,
            connected: false,
        }
    }

    /// Options shared by every ssh/scp invocation of this session.
    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "ConnectTimeout=15".into(),
            "-o".into(),
            format!("ControlPath={}", self.control_path.display()),
            "-i".into(),
            self.cfg.key_path.clone(),
        ]
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.cfg.user, self.cfg.host)
    }

    /// Establish the ControlMaster connection, retrying on transient
    /// network failure (the instance may still be booting).
    pub async fn connect(&mut self, policy: RetryPolicy) -> Result<(), SshError> {
        let deadline = Instant::now() + policy.timeout;
        let mut last = String::from("no attempt made");
        for attempt in 1..=policy.max_attempts {
            if Instant::now() >= deadline {
                break;
            }
            debug!(host = %self.cfg.host, attempt, "dialing");
            let mut args = self.common_options();
            args.extend([
                "-o".into(),
                "ControlMaster=yes".into(),
                "-o".into(),
                "ControlPersist=yes".into(),
                "-N".into(),
                "-f".into(),
                self.destination(),
            ]);
            match run_local("ssh", &args, deadline.saturating_duration_since(Instant::now()))
                .await
            {
                Ok(out) if out.code == 0 => {
                    info!(host = %self.cfg.host, "connected");
                    self.connected = true;
                    return Ok(());
                }
                Ok(out) => {
                    last = String::from_utf8_lossy(&out.output).into_owned();
                    warn!(
                        host = %self.cfg.host,
                        attempt,
                        code = out.code,
                        "failed to dial (instance might not be ready yet)"
                    );
                }
                Err(e) => last = e.to_string(),
            }
            tokio::time::sleep(policy.interval).await;
        }
        Err(SshError::Connect {
            host: self.cfg.host.clone(),
            attempts: policy.max_attempts,
            last,
        })
    }

    /// Run a command; returns combined stdout + stderr. A non-zero remote
    /// exit is an error that still carries the bytes. Transport failures
    /// reconnect and retry per the policy.
    pub async fn run(&mut self, cmd: &str, policy: RetryPolicy) -> Result<Vec<u8>, SshError> {
        let mut args = self.common_options();
        args.push(self.destination());
        args.push(cmd.to_string());
        self.with_retry("run", "ssh", args, policy).await
    }

    /// Upload a single file with scp.
    pub async fn send(
        &mut self,
        local_path: &str,
        remote_path: &str,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>, SshError> {
        let mut args = self.common_options();
        args.push(local_path.to_string());
        args.push(format!("{}:{}", self.destination(), remote_path));
        self.with_retry("send", "scp", args, policy).await
    }

    /// Download a single file with scp.
    pub async fn download(
        &mut self,
        remote_path: &str,
        local_path: &str,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>, SshError> {
        let mut args = self.common_options();
        args.push(format!("{}:{}", self.destination(), remote_path));
        args.push(local_path.to_string());
        self.with_retry("download", "scp", args, policy).await
    }

    async fn with_retry(
        &mut self,
        op: &'static str,
        program: &str,
        args: Vec<String>,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>, SshError> {
        let deadline = Instant::now() + policy.timeout;
        let mut last_transport = String::new();
        for attempt in 1..=policy.max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SshError::Timeout {
                    op,
                    timeout: policy.timeout,
                });
            }
            let out = run_local(program, &args, remaining).await?;
            if out.code == 0 {
                return Ok(out.output);
            }
            if out.code == SSH_TRANSPORT_EXIT {
                last_transport = String::from_utf8_lossy(&out.output).into_owned();
                warn!(
                    host = %self.cfg.host,
                    attempt,
                    "transport failure; reconnecting and retrying"
                );
                // Best-effort master re-establishment before the next try.
                let _ = self
                    .connect(RetryPolicy::new(1, Duration::ZERO, remaining))
                    .await;
                tokio::time::sleep(policy.interval).await;
                continue;
            }
            return Err(SshError::Command {
                code: out.code,
                output: out.output,
            });
        }
        Err(SshError::Transport {
            host: self.cfg.host.clone(),
            detail: last_transport,
        })
    }

    /// Tear the master connection down.
    pub async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let mut args = self.common_options();
        args.extend(["-O".into(), "exit".into(), self.destination()]);
        if let Err(e) = run_local("ssh", &args, Duration::from_secs(10)).await {
            warn!(host = %self.cfg.host, error = %e, "failed to close master connection");
        }
        let _ = std::fs::remove_file(&self.control_path);
    }
}

impl Drop for RemoteShell {
    fn drop(&mut self) {
        if self.connected {
            // Synchronous best-effort exit; the session must not outlive us.
            let _ = std::process::Command::new("ssh")
                .args(self.common_options())
                .args(["-O", "exit"])
                .arg(self.destination())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            let _ = std::fs::remove_file(&self.control_path);
        }
    }
}

struct LocalOutput {
    code: i32,
    output: Vec<u8>,
}

/// Spawn a local process, bounded by `timeout`, returning exit code plus
/// combined stdout + stderr.
async fn run_local(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<LocalOutput, SshError> {
    let fut = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();
    let out = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SshError::Timeout {
            op: "local process",
            timeout,
        })??;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    Ok(LocalOutput {
        code: out.status.code().unwrap_or(-1),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> RemoteShell {
        RemoteShell::new(SshConfig {
            host: "198.51.100.7".into(),
            user: "ec2-user".into(),
            key_path: "/tmp/kite-test.key".into(),
        })
    }

    #[test]
    fn common_options_pin_key_and_control_path() {
        let sh = shell();
        let opts = sh.common_options();
        assert!(opts.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(opts.iter().any(|o| o.starts_with("ControlPath=")));
        let key_pos = opts.iter().position(|o| o == "-i").unwrap();
        assert_eq!(opts[key_pos + 1], "/tmp/kite-test.key");
    }

    #[test]
    fn destination_is_user_at_host() {
        assert_eq!(shell().destination(), "ec2-user@198.51.100.7");
    }

    #[test]
    fn distinct_sessions_use_distinct_sockets() {
        let a = shell();
        let b = shell();
        assert_ne!(a.control_path, b.control_path);
    }

    #[tokio::test]
    async fn command_error_preserves_output() {
        // `sh -c "echo boom; exit 3"` through run_local directly.
        let out = run_local(
            "sh",
            &["-c".to_string(), "echo boom; exit 3".to_string()],
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(String::from_utf8_lossy(&out.output).trim(), "boom");
    }

    #[tokio::test]
    async fn run_local_merges_stdout_and_stderr() {
        let out = run_local(
            "sh",
            &["-c".to_string(), "echo out; echo err 1>&2".to_string()],
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        let s = String::from_utf8_lossy(&out.output);
        assert!(s.contains("out"));
        assert!(s.contains("err"));
    }

    #[tokio::test]
    async fn run_local_times_out() {
        let err = run_local(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SshError::Timeout { .. }));
    }
}
