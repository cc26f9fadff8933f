//! AWS service clients and error classification.
//!
//! All clients are created from one shared [`AwsContext`] so credentials
//! and region resolution happen exactly once per invocation.

pub mod cfn;
pub mod context;
pub mod ec2;
pub mod elb;
pub mod error;
pub mod s3;
pub mod ssm;

pub use cfn::{CfnClient, StackGoal, StackSnapshot};
pub use context::AwsContext;
pub use ec2::Ec2Client;
pub use elb::ElbClient;
pub use error::{classify_anyhow_error, classify_aws_error, stack_not_exist, AwsError};
pub use s3::S3Client;
pub use ssm::SsmClient;
