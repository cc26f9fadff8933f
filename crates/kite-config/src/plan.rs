//! The cluster plan: one `Plan` per invocation.
//!
//! The plan is both the configuration handed to the deployer and the record
//! of everything the deployer created (stack ids, instance inventories,
//! status trail). The YAML file at `config_path` is the sole persistent
//! state; every mutation is followed by [`Plan::sync`] before the mutating
//! call returns.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scripts;

/// A single entry in the status trail. The trail is ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusEntry {
    pub time: DateTime<Utc>,
    pub status: String,
}

/// Wall-clock frame of a create or delete pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimeFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeFrame {
    /// Stamp the start of the frame.
    pub fn start_now(&mut self) {
        self.start = Some(Utc::now());
    }

    /// Stamp the end of the frame.
    pub fn end_now(&mut self) {
        self.end = Some(Utc::now());
    }

    /// Total seconds covered by the frame, when both ends are stamped.
    pub fn took_seconds(&self) -> Option<i64> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some((e - s).num_seconds()),
            _ => None,
        }
    }
}

/// S3 bucket sub-plan for run artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct S3 {
    /// True to create the bucket; false to reuse an existing one.
    #[serde(default)]
    pub bucket_create: bool,
    /// True to keep a created bucket on teardown.
    #[serde(default)]
    pub bucket_create_keep: bool,
    #[serde(default)]
    pub bucket_name: String,
    /// Object expiration in days; 0 disables lifecycle, values in (0, 3)
    /// are coerced to 3 during validation.
    #[serde(default)]
    pub bucket_lifecycle_expiration_days: i64,
}

/// IAM node-role sub-plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Role {
    /// True to create (and later delete) the role via a stack.
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub name: String,
    /// Non-empty when reusing an existing role, or after stack creation.
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub service_principals: Vec<String>,
    #[serde(default)]
    pub managed_policy_arns: Vec<String>,
    #[serde(default)]
    pub cfn_stack_id: String,
    #[serde(default)]
    pub cfn_stack_yaml_path: String,
    #[serde(default)]
    pub cfn_stack_yaml_s3_key: String,
}

/// VPC sub-plan: either created from a stack or reused by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Vpc {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cfn_stack_id: String,
    #[serde(default)]
    pub cfn_stack_yaml_path: String,
    #[serde(default)]
    pub cfn_stack_yaml_s3_key: String,
    /// VPC CIDR; when set, all public and private subnet CIDRs must be set.
    #[serde(default)]
    pub cidr: String,
    /// Exactly 3 entries when `cidr` is set.
    #[serde(default)]
    pub public_subnet_cidrs: Vec<String>,
    /// Exactly 2 entries when `cidr` is set.
    #[serde(default)]
    pub private_subnet_cidrs: Vec<String>,
    #[serde(default)]
    pub public_subnet_ids: Vec<String>,
    #[serde(default)]
    pub private_subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_id: String,
    /// IP range admitted for inbound SSH.
    #[serde(default)]
    pub ssh_ingress_ipv4_range: String,
    #[serde(default)]
    pub dhcp_options_domain_name: String,
    #[serde(default)]
    pub dhcp_options_domain_name_servers: Vec<String>,
}

/// SSH remote-access sub-plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteAccess {
    /// True to create the EC2 key pair; false to reuse `key_name` +
    /// `private_key_path`.
    #[serde(default)]
    pub key_create: bool,
    #[serde(default)]
    pub key_name: String,
    /// Private key location; its directory must be writable.
    #[serde(default)]
    pub private_key_path: String,
    /// Generated shell snippet enumerating per-instance SSH commands.
    #[serde(default)]
    pub commands_output_path: String,
    /// Default login user applied to ASGs that do not set their own.
    #[serde(default)]
    pub user_name: String,
}

/// Kubeadm bootstrap sub-plan. Join fields are populated by the bootstrap
/// driver after `kubeadm init` succeeds on the primary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeadm {
    #[serde(default)]
    pub version: String,
    /// ASG whose instances form the control plane. Defaults to the first ASG.
    #[serde(default)]
    pub control_plane_asg_name: String,
    #[serde(default)]
    pub join_target: String,
    #[serde(default)]
    pub join_token: String,
    #[serde(default)]
    pub join_discovery_token_ca_cert_hash: String,
    /// Local path the admin kubeconfig is fetched to.
    #[serde(default)]
    pub kubeconfig_path: String,
}

/// External load balancer fronting the Kubernetes API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadBalancer {
    /// True to create the API load balancer after bootstrap.
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub target_group_arn: String,
    #[serde(default)]
    pub dns_name: String,
    /// `https://` + `dns_name`, derived after creation.
    #[serde(default)]
    pub url: String,
}

/// SSM document sub-config of an ASG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SsmDocument {
    #[serde(default)]
    pub document_create: bool,
    /// Coerced to letters and digits only during validation.
    #[serde(default)]
    pub document_name: String,
    #[serde(default)]
    pub document_commands: String,
    #[serde(default)]
    pub document_execution_timeout_seconds: i64,
    #[serde(default)]
    pub cfn_stack_name: String,
    #[serde(default)]
    pub cfn_stack_id: String,
    #[serde(default)]
    pub cfn_stack_yaml_path: String,
    #[serde(default)]
    pub cfn_stack_yaml_s3_key: String,
    #[serde(default)]
    pub command_ids: Vec<String>,
}

/// One auto-scaling group of worker or control-plane nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Asg {
    /// Must equal the key of the plan's ASG map.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub cfn_stack_id: String,
    #[serde(default)]
    pub cfn_stack_yaml_path: String,
    #[serde(default)]
    pub cfn_stack_yaml_s3_key: String,

    #[serde(default)]
    pub time_frame_create: TimeFrame,
    #[serde(default)]
    pub time_frame_delete: TimeFrame,

    /// Login user for SSH access and remote scripts.
    #[serde(default)]
    pub remote_access_user_name: String,

    #[serde(default)]
    pub ssm: SsmDocument,

    #[serde(default)]
    pub ami_type: crate::AmiType,
    /// Explicit AMI. Cleared when `image_id_ssm_parameter` is also set.
    #[serde(default)]
    pub image_id: String,
    /// SSM parameter resolving to the AMI; preferred over `image_id`.
    #[serde(default)]
    pub image_id_ssm_parameter: String,

    /// At most 4 entries.
    #[serde(default)]
    pub instance_types: Vec<String>,
    /// Root volume size in GiB.
    #[serde(default)]
    pub volume_size: i64,

    #[serde(default)]
    pub asg_min_size: i64,
    #[serde(default)]
    pub asg_max_size: i64,
    #[serde(default)]
    pub asg_desired_capacity: i64,

    /// Instance inventory, populated after the ASG stack is complete.
    #[serde(default)]
    pub instances: BTreeMap<String, Instance>,
    /// Per-instance fetched log file paths.
    #[serde(default)]
    pub logs: BTreeMap<String, Vec<String>>,
}

impl Asg {
    /// Nodes this ASG is expected to contribute: the desired capacity when
    /// set, else the minimum size.
    pub fn effective_min(&self) -> i64 {
        if self.asg_desired_capacity > 0 {
            self.asg_desired_capacity
        } else {
            self.asg_min_size
        }
    }
}

/// An EC2 instance, converted from the provider's describe output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Instance {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub key_name: String,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub private_dns_name: String,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub public_dns_name: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub state: InstanceState,
    #[serde(default)]
    pub state_reason: InstanceStateReason,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
    #[serde(default)]
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_access_user_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Placement {
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub tenancy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceState {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceStateReason {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityGroup {
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub group_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlockDeviceMapping {
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub ebs: Ebs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Ebs {
    #[serde(default)]
    pub delete_on_termination: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub volume_id: String,
}

/// The cluster plan. See the crate docs for the lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Plan {
    /// True while the cluster is up; derived from the status trail.
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub time_frame_create: TimeFrame,
    #[serde(default)]
    pub time_frame_delete: TimeFrame,
    /// Most recent status; always equals the head of `status`.
    #[serde(default)]
    pub status_current: String,
    /// Status trail, newest first.
    #[serde(default)]
    pub status: Vec<StatusEntry>,

    /// Cluster name; DNS-safe lower case.
    #[serde(default)]
    pub name: String,
    /// AWS partition, e.g. "aws".
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub region: String,

    /// Absolute path of the backing YAML file.
    #[serde(default)]
    pub config_path: String,

    #[serde(default)]
    pub on_failure_delete: bool,
    #[serde(default)]
    pub on_failure_delete_wait_seconds: u64,

    #[serde(default)]
    pub s3: S3,
    /// S3 directory (key prefix) for uploaded artifacts.
    #[serde(default)]
    pub s3_dir: String,

    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub vpc: Vpc,
    #[serde(default)]
    pub remote_access: RemoteAccess,
    #[serde(default)]
    pub kubeadm: Kubeadm,
    #[serde(default)]
    pub load_balancer: LoadBalancer,

    /// True to SSH-fetch kubelet logs from every node after bring-up.
    #[serde(default)]
    pub asgs_fetch_logs: bool,
    #[serde(default)]
    pub asgs_logs_dir: String,
    #[serde(default)]
    pub asgs: BTreeMap<String, Asg>,

    /// Σ effective minimum size over all ASGs; recomputed by validation.
    #[serde(default)]
    pub total_nodes: i64,
}

impl Plan {
    /// Load a plan from a YAML file. `validate_and_set_defaults` must be
    /// called separately so that data loaded from disk is not overwritten.
    pub fn load(path: impl AsRef<Path>) -> Result<Plan, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let mut plan: Plan = serde_yaml::from_str(&raw)?;
        let abs = absolute_path(path)?;
        plan.config_path = abs.to_string_lossy().into_owned();
        plan.sync()?;
        Ok(plan)
    }

    /// Persist the plan and the SSH command snippet.
    ///
    /// The YAML write is atomic: the document is written to a sibling temp
    /// file and renamed over `config_path`.
    pub fn sync(&mut self) -> Result<(), ConfigError> {
        if self.config_path.is_empty() {
            return Err(ConfigError::invalid("config-path is empty"));
        }
        if !Path::new(&self.config_path).is_absolute() {
            let abs = absolute_path(Path::new(&self.config_path))?;
            self.config_path = abs.to_string_lossy().into_owned();
        }

        let doc = serde_yaml::to_string(self).map_err(ConfigError::Decode)?;
        atomic_write(Path::new(&self.config_path), doc.as_bytes())?;

        if !self.remote_access.commands_output_path.is_empty() {
            let snippet = scripts::ssh_commands(self);
            atomic_write(
                Path::new(&self.remote_access.commands_output_path),
                snippet.as_bytes(),
            )?;
        }
        Ok(())
    }

    /// The ASG carrying the control plane: the configured one, else the
    /// first ASG in key order.
    pub fn control_plane_asg(&self) -> Option<&Asg> {
        if !self.kubeadm.control_plane_asg_name.is_empty() {
            return self.asgs.get(&self.kubeadm.control_plane_asg_name);
        }
        self.asgs.values().next()
    }

    /// All instances across all ASGs, paired with their ASG name.
    pub fn all_instances(&self) -> Vec<(&str, &Instance)> {
        self.asgs
            .values()
            .flat_map(|asg| asg.instances.values().map(move |i| (asg.name.as_str(), i)))
            .collect()
    }

    /// Stem used for derived file paths: the config path without `.yaml`.
    pub fn config_stem(&self) -> String {
        self.config_path
            .strip_suffix(".yaml")
            .unwrap_or(&self.config_path)
            .to_string()
    }
}

/// Absolute form of `path` without requiring it to exist.
pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Write `data` to `path` atomically via a sibling temp file + rename.
/// Used for the plan file and for every generated artifact written next to
/// it.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().ok_or_else(|| {
        ConfigError::invalid(format!("path {:?} has no parent directory", path))
    })?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_plan() -> (tempfile::TempDir, Plan) {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = Plan::new_default();
        plan.config_path = dir
            .path()
            .join("test.yaml")
            .to_string_lossy()
            .into_owned();
        plan.remote_access.commands_output_path = dir
            .path()
            .join("test.ssh.sh")
            .to_string_lossy()
            .into_owned();
        (dir, plan)
    }

    #[test]
    fn yaml_round_trip_is_stable() {
        let (_dir, mut plan) = temp_plan();
        plan.validate_and_set_defaults().unwrap();

        let first = serde_yaml::to_string(&plan).unwrap();
        let reloaded: Plan = serde_yaml::from_str(&first).unwrap();
        let second = serde_yaml::to_string(&reloaded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_recomputes_absolute_config_path() {
        let (dir, mut plan) = temp_plan();
        plan.validate_and_set_defaults().unwrap();

        let loaded = Plan::load(&plan.config_path).unwrap();
        assert!(Path::new(&loaded.config_path).is_absolute());
        assert_eq!(loaded.name, plan.name);
        assert_eq!(loaded.total_nodes, plan.total_nodes);
        drop(dir);
    }

    #[test]
    fn sync_writes_both_files() {
        let (_dir, mut plan) = temp_plan();
        plan.validate_and_set_defaults().unwrap();
        plan.sync().unwrap();

        assert!(Path::new(&plan.config_path).exists());
        assert!(Path::new(&plan.remote_access.commands_output_path).exists());
    }

    #[test]
    fn effective_min_prefers_desired_capacity() {
        let asg = Asg {
            asg_min_size: 1,
            asg_desired_capacity: 3,
            ..Default::default()
        };
        assert_eq!(asg.effective_min(), 3);

        let asg = Asg {
            asg_min_size: 2,
            asg_desired_capacity: 0,
            ..Default::default()
        };
        assert_eq!(asg.effective_min(), 2);
    }

    #[test]
    fn time_frame_took_seconds() {
        let mut tf = TimeFrame::default();
        assert_eq!(tf.took_seconds(), None);
        tf.start = Some(Utc::now());
        tf.end = Some(tf.start.unwrap() + chrono::Duration::seconds(90));
        assert_eq!(tf.took_seconds(), Some(90));
    }
}
