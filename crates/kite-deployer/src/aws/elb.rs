//! External load balancer for the Kubernetes API endpoint.
//!
//! One NLB with a single TCP :443 listener forwarding to a :443 target
//! group in the cluster VPC; every control-plane instance is registered as
//! a target. Deletion always runs targets → listeners → target group →
//! load balancer so nothing is ever reported in use.

use std::time::Duration;

use anyhow::{Context as _, Result};
use aws_sdk_elasticloadbalancingv2::types::{
    LoadBalancerSchemeEnum, LoadBalancerTypeEnum, ProtocolEnum, TargetDescription,
    TargetTypeEnum,
};
use aws_sdk_elasticloadbalancingv2::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::AwsContext;
use super::error::classify_anyhow_error;
use crate::wait::{wait_for, WaitConfig};

/// Time allowed for the load balancer to become active and publish DNS.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(180);

/// Handles recorded in the plan after creation.
#[derive(Debug, Clone, Default)]
pub struct LoadBalancer {
    pub arn: String,
    pub target_group_arn: String,
    pub dns_name: String,
}

/// ELBv2 client for the API endpoint.
#[derive(Clone)]
pub struct ElbClient {
    client: Client,
}

impl ElbClient {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.elb_client(),
        }
    }

    /// Create the NLB + target group + listener and register the given
    /// instances. Returns once DNS is published.
    pub async fn create(
        &self,
        name: &str,
        vpc_id: &str,
        subnet_ids: &[String],
        instance_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<LoadBalancer> {
        info!(name = %name, vpc_id = %vpc_id, "creating load balancer");
        let lb = self
            .client
            .create_load_balancer()
            .name(name)
            .r#type(LoadBalancerTypeEnum::Network)
            .scheme(LoadBalancerSchemeEnum::InternetFacing)
            .set_subnets(Some(subnet_ids.to_vec()))
            .send()
            .await
            .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
            .context("Failed to create load balancer")?;
        let lb = lb
            .load_balancers()
            .first()
            .context("create-load-balancer returned no load balancer")?;
        let arn = lb
            .load_balancer_arn()
            .context("load balancer has no ARN")?
            .to_string();

        let tg = self
            .client
            .create_target_group()
            .name(name)
            .protocol(ProtocolEnum::Tcp)
            .port(443)
            .vpc_id(vpc_id)
            .target_type(TargetTypeEnum::Instance)
            .send()
            .await
            .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
            .context("Failed to create target group")?;
        let tg_arn = tg
            .target_groups()
            .first()
            .and_then(|t| t.target_group_arn())
            .context("create-target-group returned no ARN")?
            .to_string();

        let targets: Vec<TargetDescription> = instance_ids
            .iter()
            .map(|id| {
                TargetDescription::builder()
                    .id(id)
                    .port(443)
                    .build()
                    .context("Failed to build target description")
            })
            .collect::<Result<_>>()?;
        self.client
            .register_targets()
            .target_group_arn(&tg_arn)
            .set_targets(Some(targets))
            .send()
            .await
            .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
            .context("Failed to register targets")?;

        self.client
            .create_listener()
            .load_balancer_arn(&arn)
            .protocol(ProtocolEnum::Tcp)
            .port(443)
            .default_actions(
                aws_sdk_elasticloadbalancingv2::types::Action::builder()
                    .r#type(aws_sdk_elasticloadbalancingv2::types::ActionTypeEnum::Forward)
                    .target_group_arn(&tg_arn)
                    .build()
                    .context("Failed to build listener action")?,
            )
            .send()
            .await
            .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
            .context("Failed to create listener")?;

        // DNS propagation gate.
        let client = self.client.clone();
        let arn_for_wait = arn.clone();
        wait_for(
            WaitConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(20),
                timeout: DNS_TIMEOUT,
            },
            cancel,
            || {
                let client = client.clone();
                let arn = arn_for_wait.clone();
                async move {
                    let out = client
                        .describe_load_balancers()
                        .load_balancer_arns(&arn)
                        .send()
                        .await
                        .context("Failed to describe load balancer")?;
                    Ok(out
                        .load_balancers()
                        .first()
                        .and_then(|l| l.dns_name())
                        .map(|d| !d.is_empty())
                        .unwrap_or(false))
                }
            },
            "load balancer DNS",
        )
        .await?;

        let out = self
            .client
            .describe_load_balancers()
            .load_balancer_arns(&arn)
            .send()
            .await
            .context("Failed to describe load balancer")?;
        let dns_name = out
            .load_balancers()
            .first()
            .and_then(|l| l.dns_name())
            .context("load balancer has no DNS name")?
            .to_string();

        info!(dns = %dns_name, "load balancer ready");
        Ok(LoadBalancer {
            arn,
            target_group_arn: tg_arn,
            dns_name,
        })
    }

    /// Delete everything, strictly ordered. Missing resources are fine.
    pub async fn delete(&self, lb: &LoadBalancer) -> Result<()> {
        for step in delete_order() {
            if let Err(e) = self.delete_step(lb, step).await {
                if classify_anyhow_error(&e).is_not_found() {
                    warn!(step = ?step, "resource already gone");
                    continue;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn delete_step(&self, lb: &LoadBalancer, step: DeleteStep) -> Result<()> {
        match step {
            DeleteStep::DeregisterTargets => {
                if lb.target_group_arn.is_empty() {
                    return Ok(());
                }
                let health = self
                    .client
                    .describe_target_health()
                    .target_group_arn(&lb.target_group_arn)
                    .send()
                    .await
                    .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
                    .context("Failed to describe target health")?;
                let targets: Vec<TargetDescription> = health
                    .target_health_descriptions()
                    .iter()
                    .filter_map(|d| d.target().cloned())
                    .collect();
                if targets.is_empty() {
                    return Ok(());
                }
                info!(count = targets.len(), "deregistering targets");
                self.client
                    .deregister_targets()
                    .target_group_arn(&lb.target_group_arn)
                    .set_targets(Some(targets))
                    .send()
                    .await
                    .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
                    .context("Failed to deregister targets")?;
            }
            DeleteStep::DeleteListeners => {
                if lb.arn.is_empty() {
                    return Ok(());
                }
                let listeners = self
                    .client
                    .describe_listeners()
                    .load_balancer_arn(&lb.arn)
                    .send()
                    .await
                    .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
                    .context("Failed to describe listeners")?;
                for l in listeners.listeners() {
                    if let Some(arn) = l.listener_arn() {
                        info!(listener = %arn, "deleting listener");
                        self.client
                            .delete_listener()
                            .listener_arn(arn)
                            .send()
                            .await
                            .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
                            .context("Failed to delete listener")?;
                    }
                }
            }
            DeleteStep::DeleteTargetGroup => {
                if lb.target_group_arn.is_empty() {
                    return Ok(());
                }
                info!(target_group = %lb.target_group_arn, "deleting target group");
                self.client
                    .delete_target_group()
                    .target_group_arn(&lb.target_group_arn)
                    .send()
                    .await
                    .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
                    .context("Failed to delete target group")?;
            }
            DeleteStep::DeleteLoadBalancer => {
                if lb.arn.is_empty() {
                    return Ok(());
                }
                info!(load_balancer = %lb.arn, "deleting load balancer");
                self.client
                    .delete_load_balancer()
                    .load_balancer_arn(&lb.arn)
                    .send()
                    .await
                    .map_err(aws_sdk_elasticloadbalancingv2::Error::from)
                    .context("Failed to delete load balancer")?;
            }
        }
        Ok(())
    }
}

/// The fixed teardown order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    DeregisterTargets,
    DeleteListeners,
    DeleteTargetGroup,
    DeleteLoadBalancer,
}

/// Targets first, the balancer last.
pub fn delete_order() -> [DeleteStep; 4] {
    [
        DeleteStep::DeregisterTargets,
        DeleteStep::DeleteListeners,
        DeleteStep::DeleteTargetGroup,
        DeleteStep::DeleteLoadBalancer,
    ]
}

/// The stable URL published into the plan.
pub fn url_for(dns_name: &str) -> String {
    format!("https://{dns_name}")
}
