//! Defaults and cross-field validation.
//!
//! `validate_and_set_defaults` enforces every plan invariant and fills
//! derived fields (paths, S3 keys, ASG sizes, total node count). It is
//! called once after load + env overlay, and again is safe to call at any
//! point: defaults never overwrite populated data.

use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::ConfigError;
use crate::plan::{absolute_path, Plan};
use crate::{
    AmiType, ASGS_MAX, ASG_SIZE_MAX, DEFAULT_SSM_EXECUTION_TIMEOUT_SECONDS, DEFAULT_VOLUME_SIZE,
    EC2_SERVICE_PRINCIPAL, ENV_PREFIX, INSTANCE_TYPES_MAX, PARTITIONS,
};

/// Number of public subnets a created VPC carries.
pub const PUBLIC_SUBNETS: usize = 3;
/// Number of private subnets a created VPC carries.
pub const PRIVATE_SUBNETS: usize = 2;

impl Plan {
    /// A ready-to-validate default plan: one single-node Amazon Linux 2 ASG,
    /// everything flagged for creation, private key under the OS temp dir.
    pub fn new_default() -> Plan {
        let name = std::env::var(format!("{ENV_PREFIX}NAME"))
            .unwrap_or_else(|_| format!("kite-{}-{}", date10(), rand_lower(12)));
        let asg_name = format!("{name}-asg");

        let mut plan = Plan {
            name,
            partition: "aws".to_string(),
            region: "us-west-2".to_string(),
            on_failure_delete: true,
            on_failure_delete_wait_seconds: 120,
            asgs_fetch_logs: true,
            ..Default::default()
        };
        plan.s3.bucket_create = true;
        plan.s3.bucket_create_keep = true;
        plan.role.create = true;
        plan.vpc.create = true;
        plan.remote_access.key_create = true;
        plan.remote_access.user_name = "ec2-user".to_string();
        plan.remote_access.private_key_path = std::env::temp_dir()
            .join(format!("{}.insecure.key", rand_lower(10)))
            .to_string_lossy()
            .into_owned();
        plan.kubeadm.version = "1.21".to_string();
        plan.load_balancer.enable = true;

        let mut asg = crate::plan::Asg {
            name: asg_name.clone(),
            ami_type: AmiType::Al2X8664,
            image_id_ssm_parameter: crate::DEFAULT_IMAGE_ID_SSM_PARAMETER.to_string(),
            instance_types: vec![crate::DEFAULT_INSTANCE_TYPE_CPU.to_string()],
            volume_size: DEFAULT_VOLUME_SIZE,
            asg_min_size: 1,
            asg_max_size: 1,
            asg_desired_capacity: 1,
            remote_access_user_name: "ec2-user".to_string(),
            ..Default::default()
        };
        asg.ssm.document_execution_timeout_seconds = DEFAULT_SSM_EXECUTION_TIMEOUT_SECONDS;
        plan.asgs.insert(asg_name, asg);
        plan
    }

    /// Enforce every invariant and fill derived fields, then persist.
    pub fn validate_and_set_defaults(&mut self) -> Result<(), ConfigError> {
        self.validate_top_level()?;
        self.validate_s3()?;
        self.validate_role()?;
        self.validate_vpc()?;
        self.validate_remote_access()?;
        self.validate_asgs()?;
        self.validate_kubeadm()?;
        self.sync()
    }

    fn validate_top_level(&mut self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("name is empty"));
        }
        if self.name != self.name.to_lowercase()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::invalid(format!(
                "name {:?} must be DNS-safe lower case",
                self.name
            )));
        }
        if !PARTITIONS.contains(&self.partition.as_str()) {
            return Err(ConfigError::invalid(format!(
                "unknown partition {:?}",
                self.partition
            )));
        }
        if self.region.is_empty()
            || !self
                .region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::invalid(format!(
                "invalid region {:?}",
                self.region
            )));
        }

        if self.config_path.is_empty() {
            let root = std::env::current_dir()
                .unwrap_or_else(|_| std::env::temp_dir().join(&self.name));
            fs::create_dir_all(&root)?;
            self.config_path = root
                .join(format!("{}.yaml", self.name))
                .to_string_lossy()
                .into_owned();
        }
        let abs = absolute_path(Path::new(&self.config_path))?;
        self.config_path = abs.to_string_lossy().into_owned();
        if let Some(dir) = abs.parent() {
            fs::create_dir_all(dir)?;
            ensure_dir_writeable(dir)?;
        }

        if self.asgs_logs_dir.is_empty() {
            let dir = Path::new(&self.config_path)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(std::env::temp_dir);
            self.asgs_logs_dir = dir
                .join(format!("{}-logs-remote", self.name))
                .to_string_lossy()
                .into_owned();
        }

        if self.remote_access.commands_output_path.is_empty() {
            self.remote_access.commands_output_path = format!("{}.ssh.sh", self.config_stem());
        }
        if !self.remote_access.commands_output_path.ends_with(".sh") {
            self.remote_access.commands_output_path += ".sh";
        }
        Ok(())
    }

    fn validate_s3(&mut self) -> Result<(), ConfigError> {
        if self.s3.bucket_create {
            if self.s3.bucket_name.is_empty() {
                self.s3.bucket_name = format!("{}-s3-bucket", self.name);
            }
            if self.s3.bucket_lifecycle_expiration_days > 0
                && self.s3.bucket_lifecycle_expiration_days < 3
            {
                self.s3.bucket_lifecycle_expiration_days = 3;
            }
        } else if self.s3.bucket_name.is_empty() {
            return Err(ConfigError::invalid(
                "s3.bucket-create false; expect non-empty s3.bucket-name",
            ));
        }
        if self.s3_dir.is_empty() {
            self.s3_dir = self.name.clone();
        }
        Ok(())
    }

    fn validate_role(&mut self) -> Result<(), ConfigError> {
        if self.role.cfn_stack_yaml_path.is_empty() {
            self.role.cfn_stack_yaml_path = format!("{}.role.cfn.yaml", self.config_stem());
        }
        if self.role.cfn_stack_yaml_s3_key.is_empty() {
            self.role.cfn_stack_yaml_s3_key =
                s3_key(&self.s3_dir, &self.role.cfn_stack_yaml_path);
        }
        if self.role.create {
            if self.role.name.is_empty() {
                self.role.name = format!("{}-role", self.name);
            }
            // A populated ARN is tolerated: it may come from a prior partial
            // run and will be overwritten by the next stack creation.
            if !self.role.service_principals.is_empty()
                && !self
                    .role
                    .service_principals
                    .iter()
                    .any(|p| p == EC2_SERVICE_PRINCIPAL)
            {
                return Err(ConfigError::invalid(format!(
                    "role.service-principals {:?} must include {:?}",
                    self.role.service_principals, EC2_SERVICE_PRINCIPAL
                )));
            }
        } else {
            if self.role.arn.is_empty() {
                return Err(ConfigError::invalid(
                    "role.create false; expect non-empty role.arn",
                ));
            }
            if self.role.name.is_empty() {
                self.role.name = name_from_arn(&self.role.arn);
            }
            if !self.role.managed_policy_arns.is_empty() {
                return Err(ConfigError::invalid(
                    "role.create false; expect empty role.managed-policy-arns",
                ));
            }
            if !self.role.service_principals.is_empty() {
                return Err(ConfigError::invalid(
                    "role.create false; expect empty role.service-principals",
                ));
            }
        }
        Ok(())
    }

    fn validate_vpc(&mut self) -> Result<(), ConfigError> {
        if self.vpc.cfn_stack_yaml_path.is_empty() {
            self.vpc.cfn_stack_yaml_path = format!("{}.vpc.cfn.yaml", self.config_stem());
        }
        if self.vpc.cfn_stack_yaml_s3_key.is_empty() {
            self.vpc.cfn_stack_yaml_s3_key = s3_key(&self.s3_dir, &self.vpc.cfn_stack_yaml_path);
        }
        if !self.vpc.create && self.vpc.id.is_empty() {
            return Err(ConfigError::invalid(
                "vpc.create false; expect non-empty vpc.id",
            ));
        }

        let subnet_cidrs_set = self
            .vpc
            .public_subnet_cidrs
            .iter()
            .chain(self.vpc.private_subnet_cidrs.iter())
            .filter(|c| !c.is_empty())
            .count();
        if self.vpc.cidr.is_empty() {
            if subnet_cidrs_set != 0 {
                return Err(ConfigError::invalid(
                    "subnet CIDRs set while vpc.cidr is empty",
                ));
            }
        } else {
            if self.vpc.public_subnet_cidrs.len() != PUBLIC_SUBNETS
                || self.vpc.public_subnet_cidrs.iter().any(String::is_empty)
            {
                return Err(ConfigError::invalid(format!(
                    "vpc.cidr {:?} requires {} public subnet CIDRs",
                    self.vpc.cidr, PUBLIC_SUBNETS
                )));
            }
            if self.vpc.private_subnet_cidrs.len() != PRIVATE_SUBNETS
                || self.vpc.private_subnet_cidrs.iter().any(String::is_empty)
            {
                return Err(ConfigError::invalid(format!(
                    "vpc.cidr {:?} requires {} private subnet CIDRs",
                    self.vpc.cidr, PRIVATE_SUBNETS
                )));
            }
        }
        Ok(())
    }

    fn validate_remote_access(&mut self) -> Result<(), ConfigError> {
        if self.remote_access.user_name.is_empty() {
            self.remote_access.user_name = "ec2-user".to_string();
        }
        if self.remote_access.key_create {
            if self.remote_access.key_name.is_empty() {
                self.remote_access.key_name = format!("{}-key", self.name);
            }
            if self.remote_access.private_key_path.is_empty() {
                self.remote_access.private_key_path = std::env::temp_dir()
                    .join(format!("{}.insecure.key", rand_lower(10)))
                    .to_string_lossy()
                    .into_owned();
            }
        } else {
            if self.remote_access.key_name.is_empty() {
                return Err(ConfigError::invalid(
                    "remote-access.key-create false; expect non-empty remote-access.key-name",
                ));
            }
            if self.remote_access.private_key_path.is_empty() {
                return Err(ConfigError::invalid(
                    "remote-access.key-create false; expect non-empty remote-access.private-key-path",
                ));
            }
            if !Path::new(&self.remote_access.private_key_path).exists() {
                return Err(ConfigError::invalid(format!(
                    "remote-access.private-key-path {:?} does not exist",
                    self.remote_access.private_key_path
                )));
            }
        }
        if let Some(dir) = Path::new(&self.remote_access.private_key_path).parent() {
            fs::create_dir_all(dir)?;
            ensure_dir_writeable(dir)?;
        }
        Ok(())
    }

    fn validate_asgs(&mut self) -> Result<(), ConfigError> {
        if self.asgs.is_empty() {
            return Err(ConfigError::invalid("asgs is empty"));
        }
        if self.asgs.len() > ASGS_MAX {
            return Err(ConfigError::invalid(format!(
                "{} ASGs exceeds the maximum of {}",
                self.asgs.len(),
                ASGS_MAX
            )));
        }

        let stem = self.config_stem();
        let s3_dir = self.s3_dir.clone();
        let default_user = self.remote_access.user_name.clone();
        let mut total = 0i64;

        for (key, asg) in &mut self.asgs {
            if asg.name.is_empty() {
                return Err(ConfigError::invalid(format!("asgs[{key:?}].name is empty")));
            }
            if key != &asg.name {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}].name {:?} does not match its key",
                    asg.name
                )));
            }

            if asg.cfn_stack_yaml_path.is_empty() {
                asg.cfn_stack_yaml_path = format!("{stem}.asg.cfn.{key}.yaml");
            }
            if asg.cfn_stack_yaml_s3_key.is_empty() {
                asg.cfn_stack_yaml_s3_key = s3_key(&s3_dir, &asg.cfn_stack_yaml_path);
            }

            if asg.instance_types.len() > INSTANCE_TYPES_MAX {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}] has {} instance types; the maximum is {}",
                    asg.instance_types.len(),
                    INSTANCE_TYPES_MAX
                )));
            }
            if asg.instance_types.is_empty() {
                asg.instance_types = vec![asg.ami_type.default_instance_type().to_string()];
            }
            if asg.volume_size == 0 {
                asg.volume_size = DEFAULT_VOLUME_SIZE;
            }

            if asg.remote_access_user_name.is_empty() {
                asg.remote_access_user_name = default_user.clone();
            }
            if asg.remote_access_user_name != asg.ami_type.remote_access_user() {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}] AMI type {} requires user {:?}, got {:?}",
                    asg.ami_type,
                    asg.ami_type.remote_access_user(),
                    asg.remote_access_user_name
                )));
            }

            if asg.image_id.is_empty() && asg.image_id_ssm_parameter.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}] both image-id and image-id-ssm-parameter are empty"
                )));
            }
            if !asg.image_id.is_empty() && !asg.image_id_ssm_parameter.is_empty() {
                // The SSM parameter wins.
                asg.image_id.clear();
            }

            if asg.ssm.cfn_stack_yaml_path.is_empty() {
                asg.ssm.cfn_stack_yaml_path = format!("{stem}.ssm.cfn.{key}.yaml");
            }
            if asg.ssm.cfn_stack_yaml_s3_key.is_empty() {
                asg.ssm.cfn_stack_yaml_s3_key = s3_key(&s3_dir, &asg.ssm.cfn_stack_yaml_path);
            }
            if asg.ssm.document_create {
                if asg.ssm.cfn_stack_name.is_empty() {
                    asg.ssm.cfn_stack_name = format!("{key}-ssm-document");
                }
                if asg.ssm.document_name.is_empty() {
                    asg.ssm.document_name = format!("{key}SSMDocument");
                }
                asg.ssm.document_name.retain(|c| c.is_ascii_alphanumeric());
                if asg.ssm.document_execution_timeout_seconds == 0 {
                    asg.ssm.document_execution_timeout_seconds =
                        DEFAULT_SSM_EXECUTION_TIMEOUT_SECONDS;
                }
            }

            if asg.asg_min_size == 0 && asg.asg_desired_capacity == 0 {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}] min size and desired capacity are both 0"
                )));
            }
            if asg.asg_desired_capacity > 0 && asg.asg_min_size == 0 {
                asg.asg_min_size = asg.asg_desired_capacity;
            }
            if asg.asg_min_size > 0 && asg.asg_desired_capacity == 0 {
                asg.asg_desired_capacity = asg.asg_min_size;
            }
            if asg.asg_max_size == 0 {
                asg.asg_max_size = asg.asg_desired_capacity;
            }
            if asg.asg_min_size > asg.asg_max_size {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}] min size {} > max size {}",
                    asg.asg_min_size, asg.asg_max_size
                )));
            }
            if asg.asg_desired_capacity > asg.asg_max_size {
                return Err(ConfigError::invalid(format!(
                    "asgs[{key:?}] desired capacity {} > max size {}",
                    asg.asg_desired_capacity, asg.asg_max_size
                )));
            }
            for (label, v) in [
                ("min size", asg.asg_min_size),
                ("max size", asg.asg_max_size),
                ("desired capacity", asg.asg_desired_capacity),
            ] {
                if v > ASG_SIZE_MAX {
                    return Err(ConfigError::invalid(format!(
                        "asgs[{key:?}] {label} {v} > limit {ASG_SIZE_MAX}"
                    )));
                }
            }

            total += asg.effective_min();
        }

        self.total_nodes = total;
        Ok(())
    }

    fn validate_kubeadm(&mut self) -> Result<(), ConfigError> {
        if self.kubeadm.version.is_empty() {
            self.kubeadm.version = "1.21".to_string();
        }
        if !self.kubeadm.control_plane_asg_name.is_empty()
            && !self.asgs.contains_key(&self.kubeadm.control_plane_asg_name)
        {
            return Err(ConfigError::invalid(format!(
                "kubeadm.control-plane-asg-name {:?} is not a configured ASG",
                self.kubeadm.control_plane_asg_name
            )));
        }
        if self.kubeadm.kubeconfig_path.is_empty() {
            self.kubeadm.kubeconfig_path = format!(
                "{}.{}.kubeconfig.generated.yaml",
                self.config_stem(),
                self.name
            );
        }
        if self.load_balancer.enable && self.load_balancer.name.is_empty() {
            // ELB names are capped at 32 characters.
            let mut name = format!("{}-lb", self.name);
            name.truncate(32);
            self.load_balancer.name = name.trim_end_matches('-').to_string();
        }
        Ok(())
    }
}

/// `<s3-dir>/<file name>` key for an uploaded artifact.
fn s3_key(s3_dir: &str, local_path: &str) -> String {
    let base = Path::new(local_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{s3_dir}/{base}")
}

/// "role-x" from "arn:aws:iam::123:role/role-x".
fn name_from_arn(arn: &str) -> String {
    arn.rsplit('/').next().unwrap_or(arn).to_string()
}

/// Verify `dir` is writable by creating and removing a probe file.
fn ensure_dir_writeable(dir: &Path) -> Result<(), ConfigError> {
    let probe: PathBuf = dir.join(format!(".kite-touch-{}", rand_lower(8)));
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => Err(ConfigError::DirNotWritable(dir.to_path_buf())),
    }
}

/// First 10 characters of the UTC timestamp, `YYYYMMDDHH`.
fn date10() -> String {
    let ts = chrono::Utc::now().format("%Y%m%d%H%M").to_string();
    ts.chars().take(10).collect()
}

/// Random lower-case alphanumeric suffix.
fn rand_lower(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_in(dir: &tempfile::TempDir) -> Plan {
        let mut plan = Plan::new_default();
        plan.config_path = dir.path().join("v.yaml").to_string_lossy().into_owned();
        plan
    }

    #[test]
    fn default_plan_validates() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        plan.validate_and_set_defaults().unwrap();

        assert_eq!(plan.total_nodes, 1);
        assert!(plan.role.cfn_stack_yaml_path.ends_with(".role.cfn.yaml"));
        assert!(plan.vpc.cfn_stack_yaml_path.ends_with(".vpc.cfn.yaml"));
        assert!(plan
            .remote_access
            .commands_output_path
            .ends_with(".ssh.sh"));
        assert!(Path::new(&plan.config_path).is_absolute());
        let asg = plan.asgs.values().next().unwrap();
        assert!(asg
            .cfn_stack_yaml_path
            .contains(&format!(".asg.cfn.{}.", asg.name)));
        assert_eq!(
            asg.cfn_stack_yaml_s3_key,
            format!(
                "{}/{}",
                plan.s3_dir,
                Path::new(&asg.cfn_stack_yaml_path)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
            )
        );
        assert!(plan
            .kubeadm
            .kubeconfig_path
            .ends_with(&format!("{}.kubeconfig.generated.yaml", plan.name)));
    }

    #[test]
    fn reuse_mode_keeps_handles_and_requires_them() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("existing.key");
        fs::write(&key, b"fake").unwrap();

        let mut plan = plan_in(&dir);
        plan.role.create = false;
        plan.role.arn = "arn:aws:iam::123456789012:role/x".to_string();
        plan.vpc.create = false;
        plan.vpc.id = "vpc-abc".to_string();
        plan.remote_access.key_create = false;
        plan.remote_access.key_name = "existing-key".to_string();
        plan.remote_access.private_key_path = key.to_string_lossy().into_owned();

        plan.validate_and_set_defaults().unwrap();
        assert_eq!(plan.role.name, "x");
        assert_eq!(plan.vpc.id, "vpc-abc");

        // Reuse mode with a missing handle is rejected.
        let mut bad = plan_in(&dir);
        bad.role.create = false;
        assert!(matches!(
            bad.validate_and_set_defaults(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn reuse_role_rejects_create_only_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        plan.role.create = false;
        plan.role.arn = "arn:aws:iam::123456789012:role/x".to_string();
        plan.role.managed_policy_arns = vec!["arn:aws:iam::aws:policy/p".to_string()];
        assert!(plan.validate_and_set_defaults().is_err());
    }

    #[test]
    fn created_role_service_principals_must_include_ec2() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        plan.role.service_principals = vec!["eks.amazonaws.com".to_string()];
        assert!(plan.validate_and_set_defaults().is_err());

        plan.role.service_principals =
            vec!["eks.amazonaws.com".to_string(), EC2_SERVICE_PRINCIPAL.to_string()];
        plan.validate_and_set_defaults().unwrap();
    }

    #[test]
    fn vpc_cidr_all_or_none() {
        let dir = tempfile::tempdir().unwrap();

        let mut plan = plan_in(&dir);
        plan.vpc.cidr = "10.0.0.0/16".to_string();
        assert!(plan.validate_and_set_defaults().is_err());

        plan.vpc.public_subnet_cidrs = vec![
            "10.0.0.0/19".to_string(),
            "10.0.32.0/19".to_string(),
            "10.0.64.0/19".to_string(),
        ];
        plan.vpc.private_subnet_cidrs =
            vec!["10.0.96.0/19".to_string(), "10.0.128.0/19".to_string()];
        plan.validate_and_set_defaults().unwrap();

        let mut plan = plan_in(&dir);
        plan.vpc.public_subnet_cidrs = vec!["10.0.0.0/19".to_string()];
        assert!(plan.validate_and_set_defaults().is_err());
    }

    fn set_sizes(plan: &mut Plan, min: i64, max: i64, desired: i64) -> String {
        let name = plan.asgs.keys().next().unwrap().clone();
        let asg = plan.asgs.get_mut(&name).unwrap();
        asg.asg_min_size = min;
        asg.asg_max_size = max;
        asg.asg_desired_capacity = desired;
        name
    }

    #[test]
    fn asg_size_rules() {
        let dir = tempfile::tempdir().unwrap();

        // min=0, desired=0 is rejected.
        let mut plan = plan_in(&dir);
        set_sizes(&mut plan, 0, 0, 0);
        assert!(plan.validate_and_set_defaults().is_err());

        // min only propagates to desired and max.
        let mut plan = plan_in(&dir);
        let name = set_sizes(&mut plan, 30, 0, 0);
        plan.validate_and_set_defaults().unwrap();
        let asg = &plan.asgs[&name];
        assert_eq!(
            (asg.asg_min_size, asg.asg_desired_capacity, asg.asg_max_size),
            (30, 30, 30)
        );
        assert_eq!(plan.total_nodes, 30);

        // Over the per-ASG limit.
        let mut plan = plan_in(&dir);
        set_sizes(&mut plan, 101, 101, 101);
        assert!(plan.validate_and_set_defaults().is_err());
    }

    #[test]
    fn too_many_instance_types_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        let name = plan.asgs.keys().next().unwrap().clone();
        plan.asgs.get_mut(&name).unwrap().instance_types = vec![
            "c5.large".to_string(),
            "c5.xlarge".to_string(),
            "c5.2xlarge".to_string(),
            "c5.4xlarge".to_string(),
            "c5.9xlarge".to_string(),
        ];
        assert!(plan.validate_and_set_defaults().is_err());
    }

    #[test]
    fn too_many_asgs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        let template = plan.asgs.values().next().unwrap().clone();
        for i in 0..ASGS_MAX {
            let mut asg = template.clone();
            asg.name = format!("extra-{i}");
            plan.asgs.insert(asg.name.clone(), asg);
        }
        assert!(plan.asgs.len() > ASGS_MAX);
        assert!(plan.validate_and_set_defaults().is_err());
    }

    #[test]
    fn lifecycle_days_coerced_to_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        plan.s3.bucket_lifecycle_expiration_days = 1;
        plan.validate_and_set_defaults().unwrap();
        assert_eq!(plan.s3.bucket_lifecycle_expiration_days, 3);

        let mut plan = plan_in(&dir);
        plan.s3.bucket_lifecycle_expiration_days = 10;
        plan.validate_and_set_defaults().unwrap();
        assert_eq!(plan.s3.bucket_lifecycle_expiration_days, 10);

        let mut plan = plan_in(&dir);
        plan.s3.bucket_lifecycle_expiration_days = 0;
        plan.validate_and_set_defaults().unwrap();
        assert_eq!(plan.s3.bucket_lifecycle_expiration_days, 0);
    }

    #[test]
    fn ssm_parameter_wins_over_image_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        let name = plan.asgs.keys().next().unwrap().clone();
        {
            let asg = plan.asgs.get_mut(&name).unwrap();
            asg.image_id = "ami-12345678".to_string();
            // image_id_ssm_parameter already set by the default plan
        }
        plan.validate_and_set_defaults().unwrap();
        let asg = &plan.asgs[&name];
        assert!(asg.image_id.is_empty());
        assert!(!asg.image_id_ssm_parameter.is_empty());
    }

    #[test]
    fn ssm_document_name_is_coerced_to_alnum() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        let name = plan.asgs.keys().next().unwrap().clone();
        {
            let asg = plan.asgs.get_mut(&name).unwrap();
            asg.ssm.document_create = true;
            asg.ssm.document_name = "my-doc.v2".to_string();
        }
        plan.validate_and_set_defaults().unwrap();
        let asg = &plan.asgs[&name];
        assert_eq!(asg.ssm.document_name, "mydocv2");
        assert_eq!(
            asg.ssm.document_execution_timeout_seconds,
            DEFAULT_SSM_EXECUTION_TIMEOUT_SECONDS
        );
        assert_eq!(asg.ssm.cfn_stack_name, format!("{name}-ssm-document"));
    }

    #[test]
    fn asg_key_must_match_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(&dir);
        let template = plan.asgs.values().next().unwrap().clone();
        plan.asgs.clear();
        let mut asg = template;
        asg.name = "other-name".to_string();
        plan.asgs.insert("the-key".to_string(), asg);
        assert!(plan.validate_and_set_defaults().is_err());
    }

    #[test]
    fn name_from_arn_strips_prefix() {
        assert_eq!(name_from_arn("arn:aws:iam::123:role/role-x"), "role-x");
        assert_eq!(name_from_arn("plain-name"), "plain-name");
    }
}
