//! EC2 instance and key pair management

use anyhow::{Context as _, Result};
use aws_sdk_ec2::types::{Filter, KeyType};
use aws_sdk_ec2::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use kite_config::{
    BlockDeviceMapping, Ebs, Instance, InstanceState, InstanceStateReason, Placement,
    SecurityGroup,
};

use super::context::AwsContext;

/// EC2 client for instance inventory and SSH key pairs.
#[derive(Clone)]
pub struct Ec2Client {
    pub client: Client,
}

impl Ec2Client {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }

    /// List running instances belonging to a CloudFormation stack, keyed by
    /// instance id.
    pub async fn stack_instances(&self, stack_name: &str) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .describe_instances()
                .filters(
                    Filter::builder()
                        .name("tag:aws:cloudformation:stack-name")
                        .values(stack_name)
                        .build(),
                )
                .filters(
                    Filter::builder()
                        .name("instance-state-name")
                        .values("pending")
                        .values("running")
                        .build(),
                );
            if let Some(token) = &next_token {
                req = req.next_token(token);
            }
            let resp = req.send().await.context("Failed to describe instances")?;
            for reservation in resp.reservations() {
                for inst in reservation.instances() {
                    instances.push(convert_instance(inst));
                }
            }
            match resp.next_token() {
                Some(t) => next_token = Some(t.to_string()),
                None => break,
            }
        }
        debug!(stack_name = %stack_name, count = instances.len(), "described stack instances");
        Ok(instances)
    }

    /// Create an SSH key pair and return its private key material.
    pub async fn create_key_pair(&self, key_name: &str) -> Result<String> {
        info!(key_name = %key_name, "creating key pair");
        let out = self
            .client
            .create_key_pair()
            .key_name(key_name)
            .key_type(KeyType::Rsa)
            .send()
            .await
            .map_err(aws_sdk_ec2::Error::from)
            .context("Failed to create key pair")?;
        out.key_material()
            .map(str::to_string)
            .context("create-key-pair response carried no key material")
    }

    /// Delete an SSH key pair.
    pub async fn delete_key_pair(&self, key_name: &str) -> Result<()> {
        info!(key_name = %key_name, "deleting key pair");
        self.client
            .delete_key_pair()
            .key_name(key_name)
            .send()
            .await
            .map_err(aws_sdk_ec2::Error::from)
            .context("Failed to delete key pair")?;
        Ok(())
    }

    /// Subnet ids and default security group of an existing VPC, for the
    /// reuse path where no VPC stack is created.
    pub async fn describe_vpc(&self, vpc_id: &str) -> Result<(Vec<String>, String)> {
        let subnets = self
            .client
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .context("Failed to describe subnets")?;
        let subnet_ids: Vec<String> = subnets
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id().map(str::to_string))
            .collect();

        let sgs = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(Filter::builder().name("group-name").values("default").build())
            .send()
            .await
            .context("Failed to describe security groups")?;
        let sg_id = sgs
            .security_groups()
            .first()
            .and_then(|g| g.group_id())
            .map(str::to_string)
            .with_context(|| format!("VPC {vpc_id} has no default security group"))?;

        Ok((subnet_ids, sg_id))
    }
}

/// Convert the provider's instance descriptor to the plan shape.
pub fn convert_instance(inst: &aws_sdk_ec2::types::Instance) -> Instance {
    let launch_time = inst.launch_time().and_then(|t| {
        DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
    });
    Instance {
        architecture: inst
            .architecture()
            .map(|a| a.as_str().to_string())
            .unwrap_or_default(),
        image_id: inst.image_id().unwrap_or_default().to_string(),
        instance_id: inst.instance_id().unwrap_or_default().to_string(),
        instance_type: inst
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        key_name: inst.key_name().unwrap_or_default().to_string(),
        placement: inst
            .placement()
            .map(|p| Placement {
                availability_zone: p.availability_zone().unwrap_or_default().to_string(),
                tenancy: p.tenancy().map(|t| t.as_str().to_string()).unwrap_or_default(),
            })
            .unwrap_or_default(),
        private_dns_name: inst.private_dns_name().unwrap_or_default().to_string(),
        private_ip: inst.private_ip_address().unwrap_or_default().to_string(),
        public_dns_name: inst.public_dns_name().unwrap_or_default().to_string(),
        public_ip: inst.public_ip_address().unwrap_or_default().to_string(),
        state: inst
            .state()
            .map(|s| InstanceState {
                code: s.code().unwrap_or_default() as i64,
                name: s.name().map(|n| n.as_str().to_string()).unwrap_or_default(),
            })
            .unwrap_or_default(),
        state_reason: inst
            .state_reason()
            .map(|r| InstanceStateReason {
                code: r.code().unwrap_or_default().to_string(),
                message: r.message().unwrap_or_default().to_string(),
            })
            .unwrap_or_default(),
        subnet_id: inst.subnet_id().unwrap_or_default().to_string(),
        vpc_id: inst.vpc_id().unwrap_or_default().to_string(),
        security_groups: inst
            .security_groups()
            .iter()
            .map(|g| SecurityGroup {
                group_name: g.group_name().unwrap_or_default().to_string(),
                group_id: g.group_id().unwrap_or_default().to_string(),
            })
            .collect(),
        block_device_mappings: inst
            .block_device_mappings()
            .iter()
            .map(|m| BlockDeviceMapping {
                device_name: m.device_name().unwrap_or_default().to_string(),
                ebs: m
                    .ebs()
                    .map(|e| Ebs {
                        delete_on_termination: e.delete_on_termination().unwrap_or_default(),
                        status: e
                            .status()
                            .map(|s| s.as_str().to_string())
                            .unwrap_or_default(),
                        volume_id: e.volume_id().unwrap_or_default().to_string(),
                    })
                    .unwrap_or_default(),
            })
            .collect(),
        launch_time,
        remote_access_user_name: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types as ec2t;

    #[test]
    fn convert_instance_maps_core_fields() {
        let raw = ec2t::Instance::builder()
            .instance_id("i-0abc")
            .image_id("ami-1")
            .instance_type(ec2t::InstanceType::C5Xlarge)
            .key_name("kite-key")
            .private_ip_address("10.0.1.5")
            .public_ip_address("3.3.3.3")
            .public_dns_name("ec2-3-3-3-3.compute.amazonaws.com")
            .subnet_id("subnet-1")
            .vpc_id("vpc-1")
            .state(
                ec2t::InstanceState::builder()
                    .code(16)
                    .name(ec2t::InstanceStateName::Running)
                    .build(),
            )
            .placement(
                ec2t::Placement::builder()
                    .availability_zone("us-west-2a")
                    .tenancy(ec2t::Tenancy::Default)
                    .build(),
            )
            .security_groups(
                ec2t::GroupIdentifier::builder()
                    .group_id("sg-1")
                    .group_name("kite-sg")
                    .build(),
            )
            .build();

        let inst = convert_instance(&raw);
        assert_eq!(inst.instance_id, "i-0abc");
        assert_eq!(inst.instance_type, "c5.xlarge");
        assert_eq!(inst.state.name, "running");
        assert_eq!(inst.state.code, 16);
        assert_eq!(inst.placement.availability_zone, "us-west-2a");
        assert_eq!(inst.private_ip, "10.0.1.5");
        assert_eq!(inst.security_groups[0].group_id, "sg-1");
    }

    #[test]
    fn convert_instance_tolerates_missing_fields() {
        let raw = ec2t::Instance::builder().instance_id("i-1").build();
        let inst = convert_instance(&raw);
        assert_eq!(inst.instance_id, "i-1");
        assert!(inst.public_ip.is_empty());
        assert!(inst.state.name.is_empty());
        assert!(inst.launch_time.is_none());
    }
}
