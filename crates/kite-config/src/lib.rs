//! kite-config - Cluster plan schema and persistence
//!
//! This crate defines the [`Plan`]: the single configuration + state object
//! that drives one kite invocation. The plan is loaded from YAML, overlaid
//! with `KITE_*` environment variables, validated, and written back to disk
//! after every mutation. It carries no AWS SDK dependency; the deployer crate
//! owns all SDK-coupled code.
//!
//! ## Modules
//!
//! - [`plan`]: the `Plan` and its sub-plans (S3, role, VPC, remote access,
//!   kubeadm, ASGs) plus the instance inventory types
//! - [`env`]: explicit-registry environment variable overlay
//! - [`validate`]: defaults + cross-field validation
//! - [`status`]: status trail and the canonical `PlanStatus` values
//! - [`scripts`]: generated SSH command snippet

pub mod env;
pub mod error;
pub mod plan;
pub mod scripts;
pub mod status;
pub mod validate;

pub use error::ConfigError;
pub use plan::{
    Asg, BlockDeviceMapping, Ebs, Instance, InstanceState, InstanceStateReason, Kubeadm,
    LoadBalancer, Placement, Plan, RemoteAccess, Role, S3, SecurityGroup, SsmDocument,
    StatusEntry, TimeFrame, Vpc,
};
pub use status::PlanStatus;

/// Environment variable prefix for every plan overlay key.
pub const ENV_PREFIX: &str = "KITE_";

/// Sentinel written to a node's cloud-init log when node preparation is done.
pub const PLUGIN_READY_SENTINEL: &str = "KITE_PLUGIN_READY";

/// Maximum number of ASGs per cluster.
pub const ASGS_MAX: usize = 10;

/// Maximum number of nodes per ASG.
pub const ASG_SIZE_MAX: i64 = 100;

/// Maximum number of instance types per ASG.
pub const INSTANCE_TYPES_MAX: usize = 4;

/// Default EC2 instance type for CPU nodes.
pub const DEFAULT_INSTANCE_TYPE_CPU: &str = "c5.xlarge";

/// Default EC2 instance type for GPU nodes.
pub const DEFAULT_INSTANCE_TYPE_GPU: &str = "p3.8xlarge";

/// Default root volume size in GiB.
pub const DEFAULT_VOLUME_SIZE: i64 = 40;

/// Default SSM parameter resolving to the latest Amazon Linux 2 AMI.
pub const DEFAULT_IMAGE_ID_SSM_PARAMETER: &str =
    "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";

/// Default SSM document execution timeout in seconds.
pub const DEFAULT_SSM_EXECUTION_TIMEOUT_SECONDS: i64 = 3600;

/// Service principal that must be present on a created node role.
pub const EC2_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";

/// Known AWS partitions.
pub const PARTITIONS: &[&str] = &["aws", "aws-cn", "aws-us-gov", "aws-iso", "aws-iso-b"];

/// AMI type of an ASG. The remote-access user for all three is `ec2-user`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum AmiType {
    /// Amazon Linux 2.
    #[default]
    #[serde(rename = "AL2_x86_64")]
    #[strum(serialize = "AL2_x86_64")]
    Al2X8664,
    /// Amazon Linux 2 with GPU support.
    #[serde(rename = "AL2_x86_64_GPU")]
    #[strum(serialize = "AL2_x86_64_GPU")]
    Al2X8664Gpu,
    /// Bottlerocket OS.
    #[serde(rename = "BOTTLEROCKET_x86_64")]
    #[strum(serialize = "BOTTLEROCKET_x86_64")]
    BottleRocketX8664,
}

impl AmiType {
    /// Default instance type for nodes of this AMI type.
    pub fn default_instance_type(self) -> &'static str {
        match self {
            AmiType::Al2X8664 | AmiType::BottleRocketX8664 => DEFAULT_INSTANCE_TYPE_CPU,
            AmiType::Al2X8664Gpu => DEFAULT_INSTANCE_TYPE_GPU,
        }
    }

    /// The only login user permitted for this AMI type.
    pub fn remote_access_user(self) -> &'static str {
        "ec2-user"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ami_type_round_trip() {
        for (ty, s) in [
            (AmiType::Al2X8664, "AL2_x86_64"),
            (AmiType::Al2X8664Gpu, "AL2_x86_64_GPU"),
            (AmiType::BottleRocketX8664, "BOTTLEROCKET_x86_64"),
        ] {
            assert_eq!(ty.to_string(), s);
            assert_eq!(s.parse::<AmiType>().unwrap(), ty);
        }
    }

    #[test]
    fn ami_type_defaults() {
        assert_eq!(
            AmiType::Al2X8664.default_instance_type(),
            DEFAULT_INSTANCE_TYPE_CPU
        );
        assert_eq!(
            AmiType::Al2X8664Gpu.default_instance_type(),
            DEFAULT_INSTANCE_TYPE_GPU
        );
        assert_eq!(AmiType::BottleRocketX8664.remote_access_user(), "ec2-user");
    }
}
