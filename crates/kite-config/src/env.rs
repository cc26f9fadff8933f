//! Environment variable overlay.
//!
//! Every supported key is enumerated in one explicit registry below — no
//! reflection. Keys are `KITE_` + the upper-snake form of the field's YAML
//! path, scoped to exactly one sub-plan (`KITE_VPC_ID`, `KITE_ROLE_ARN`,
//! `KITE_REMOTE_ACCESS_KEY_CREATE`, ...). Values override whatever the file
//! provided; the overlay is idempotent.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::plan::{Asg, Plan};
use crate::ENV_PREFIX;

impl Plan {
    /// Overlay the plan from `KITE_*` process environment variables.
    pub fn update_from_envs(&mut self) -> Result<(), ConfigError> {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        self.apply_env_overlay(&vars)
    }

    /// Apply an explicit key/value overlay. Keys must carry the `KITE_`
    /// prefix; unknown keys and unparseable values are errors.
    pub fn apply_env_overlay(&mut self, vars: &[(String, String)]) -> Result<(), ConfigError> {
        for (key, value) in vars {
            let suffix = key.strip_prefix(ENV_PREFIX).ok_or_else(|| {
                env_err(key, value, format!("missing {ENV_PREFIX} prefix"))
            })?;
            match suffix {
                "NAME" => self.name = value.clone(),
                "PARTITION" => self.partition = value.clone(),
                "REGION" => self.region = value.clone(),
                "S3_DIR" => self.s3_dir = value.clone(),

                "ON_FAILURE_DELETE" => self.on_failure_delete = parse_bool(key, value)?,
                "ON_FAILURE_DELETE_WAIT_SECONDS" => {
                    self.on_failure_delete_wait_seconds = parse_duration_seconds(key, value)?
                }

                "S3_BUCKET_CREATE" => self.s3.bucket_create = parse_bool(key, value)?,
                "S3_BUCKET_CREATE_KEEP" => self.s3.bucket_create_keep = parse_bool(key, value)?,
                "S3_BUCKET_NAME" => self.s3.bucket_name = value.clone(),
                "S3_BUCKET_LIFECYCLE_EXPIRATION_DAYS" => {
                    self.s3.bucket_lifecycle_expiration_days = parse_i64(key, value)?
                }

                "ROLE_CREATE" => self.role.create = parse_bool(key, value)?,
                "ROLE_NAME" => self.role.name = value.clone(),
                "ROLE_ARN" => self.role.arn = value.clone(),
                "ROLE_SERVICE_PRINCIPALS" => {
                    self.role.service_principals = parse_list(value)
                }
                "ROLE_MANAGED_POLICY_ARNS" => {
                    self.role.managed_policy_arns = parse_list(value)
                }

                "VPC_CREATE" => self.vpc.create = parse_bool(key, value)?,
                "VPC_ID" => self.vpc.id = value.clone(),
                "VPC_CIDR" => self.vpc.cidr = value.clone(),
                "VPC_PUBLIC_SUBNET_CIDRS" => self.vpc.public_subnet_cidrs = parse_list(value),
                "VPC_PRIVATE_SUBNET_CIDRS" => self.vpc.private_subnet_cidrs = parse_list(value),
                "VPC_SSH_INGRESS_IPV4_RANGE" => self.vpc.ssh_ingress_ipv4_range = value.clone(),
                "VPC_DHCP_OPTIONS_DOMAIN_NAME" => {
                    self.vpc.dhcp_options_domain_name = value.clone()
                }
                "VPC_DHCP_OPTIONS_DOMAIN_NAME_SERVERS" => {
                    self.vpc.dhcp_options_domain_name_servers = parse_list(value)
                }

                "REMOTE_ACCESS_KEY_CREATE" => {
                    self.remote_access.key_create = parse_bool(key, value)?
                }
                "REMOTE_ACCESS_KEY_NAME" => self.remote_access.key_name = value.clone(),
                "REMOTE_ACCESS_PRIVATE_KEY_PATH" => {
                    self.remote_access.private_key_path = value.clone()
                }
                "REMOTE_ACCESS_USER_NAME" => self.remote_access.user_name = value.clone(),

                "KUBEADM_VERSION" => self.kubeadm.version = value.clone(),
                "KUBEADM_CONTROL_PLANE_ASG_NAME" => {
                    self.kubeadm.control_plane_asg_name = value.clone()
                }
                "KUBEADM_KUBECONFIG_PATH" => self.kubeadm.kubeconfig_path = value.clone(),

                "LOAD_BALANCER_ENABLE" => self.load_balancer.enable = parse_bool(key, value)?,
                "LOAD_BALANCER_NAME" => self.load_balancer.name = value.clone(),

                "ASGS_FETCH_LOGS" => self.asgs_fetch_logs = parse_bool(key, value)?,
                "ASGS_LOGS_DIR" => self.asgs_logs_dir = value.clone(),
                "ASGS" => {
                    let asgs: BTreeMap<String, Asg> =
                        serde_json::from_str(value).map_err(|e| env_err(key, value, e))?;
                    self.asgs = asgs;
                }

                other => {
                    return Err(env_err(key, value, format!("unknown key suffix {other:?}")))
                }
            }
        }
        Ok(())
    }
}

fn env_err(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::EnvParse {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(env_err(key, value, "expected \"true\" or \"false\"")),
    }
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse().map_err(|e| env_err(key, value, e))
}

/// Comma-separated list; empty input yields an empty list.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Duration in seconds, accepting `"2h"`, `"30m"`, `"120s"`, or bare seconds.
fn parse_duration_seconds(key: &str, value: &str) -> Result<u64, ConfigError> {
    let s = value.trim();
    let (num, mult) = if let Some(h) = s.strip_suffix('h') {
        (h, 3600)
    } else if let Some(m) = s.strip_suffix('m') {
        (m, 60)
    } else if let Some(sec) = s.strip_suffix('s') {
        (sec, 1)
    } else {
        (s, 1)
    };
    let n: u64 = num
        .parse()
        .map_err(|_| env_err(key, value, "expected a duration like 2h, 30m, or 120s"))?;
    Ok(n * mult)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn overlay_scalars_and_lists() {
        let mut plan = Plan::new_default();
        plan.apply_env_overlay(&kv(&[
            ("KITE_REGION", "us-east-1"),
            ("KITE_ON_FAILURE_DELETE", "false"),
            ("KITE_ON_FAILURE_DELETE_WAIT_SECONDS", "2m"),
            ("KITE_S3_BUCKET_CREATE", "true"),
            ("KITE_S3_BUCKET_NAME", "my-bucket"),
            ("KITE_S3_BUCKET_LIFECYCLE_EXPIRATION_DAYS", "10"),
            ("KITE_ROLE_CREATE", "false"),
            ("KITE_ROLE_ARN", "arn:aws:iam::123:role/x"),
            ("KITE_VPC_CREATE", "false"),
            ("KITE_VPC_ID", "vpc-id"),
            (
                "KITE_VPC_DHCP_OPTIONS_DOMAIN_NAME_SERVERS",
                "1.2.3.0,4.5.6.7",
            ),
        ]))
        .unwrap();

        assert_eq!(plan.region, "us-east-1");
        assert!(!plan.on_failure_delete);
        assert_eq!(plan.on_failure_delete_wait_seconds, 120);
        assert_eq!(plan.s3.bucket_name, "my-bucket");
        assert_eq!(plan.s3.bucket_lifecycle_expiration_days, 10);
        assert!(!plan.role.create);
        assert_eq!(plan.role.arn, "arn:aws:iam::123:role/x");
        assert!(!plan.vpc.create);
        assert_eq!(plan.vpc.id, "vpc-id");
        assert_eq!(
            plan.vpc.dhcp_options_domain_name_servers,
            vec!["1.2.3.0".to_string(), "4.5.6.7".to_string()]
        );
    }

    #[test]
    fn overlay_nested_asgs_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = Plan::new_default();
        plan.config_path = dir.path().join("e.yaml").to_string_lossy().into_owned();
        plan.apply_env_overlay(&kv(&[
            (
                "KITE_ASGS",
                r#"{"t-asg":{"name":"t-asg","image-id":"ami-1","ami-type":"AL2_x86_64","asg-min-size":30}}"#,
            ),
            ("KITE_REMOTE_ACCESS_USER_NAME", "ec2-user"),
        ]))
        .unwrap();
        plan.validate_and_set_defaults().unwrap();

        let asg = &plan.asgs["t-asg"];
        assert_eq!(asg.image_id, "ami-1");
        assert_eq!(asg.asg_min_size, 30);
        assert_eq!(asg.asg_max_size, 30);
        assert_eq!(asg.asg_desired_capacity, 30);
        assert_eq!(asg.remote_access_user_name, "ec2-user");
        assert_eq!(plan.total_nodes, 30);
    }

    #[test]
    fn overlay_is_idempotent() {
        let vars = kv(&[
            ("KITE_REGION", "eu-west-1"),
            ("KITE_ROLE_MANAGED_POLICY_ARNS", "arn:a,arn:b"),
        ]);
        let mut once = Plan::new_default();
        once.apply_env_overlay(&vars).unwrap();
        let mut twice = once.clone();
        twice.apply_env_overlay(&vars).unwrap();

        assert_eq!(
            serde_yaml::to_string(&once).unwrap(),
            serde_yaml::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn bad_values_are_rejected_with_context() {
        let mut plan = Plan::new_default();
        let err = plan
            .apply_env_overlay(&kv(&[("KITE_ON_FAILURE_DELETE", "yes")]))
            .unwrap_err();
        match err {
            ConfigError::EnvParse { key, value, .. } => {
                assert_eq!(key, "KITE_ON_FAILURE_DELETE");
                assert_eq!(value, "yes");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(plan
            .apply_env_overlay(&kv(&[("KITE_S3_BUCKET_LIFECYCLE_EXPIRATION_DAYS", "soon")]))
            .is_err());
        assert!(plan
            .apply_env_overlay(&kv(&[("KITE_ASGS", "{not json")]))
            .is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut plan = Plan::new_default();
        assert!(plan
            .apply_env_overlay(&kv(&[("KITE_NO_SUCH_FIELD", "1")]))
            .is_err());
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration_seconds("K", "2h").unwrap(), 7200);
        assert_eq!(parse_duration_seconds("K", "30m").unwrap(), 1800);
        assert_eq!(parse_duration_seconds("K", "120s").unwrap(), 120);
        assert_eq!(parse_duration_seconds("K", "45").unwrap(), 45);
        assert!(parse_duration_seconds("K", "soon").is_err());
    }
}
