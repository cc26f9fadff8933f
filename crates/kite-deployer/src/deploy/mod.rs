//! Phased cluster creation and symmetric teardown.
//!
//! The `Deployer` owns the plan and is its only writer. Each phase records
//! a status at its boundaries and persists every handle before the next
//! phase starts, so a partial run can always be torn down from the file
//! alone. On a phase failure with `on-failure-delete`, the already-created
//! phases are rolled back in reverse, best effort, and rollback errors are
//! reported as one compound error. Cancellation never triggers rollback.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use kite_config::{Plan, PlanStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aws::cfn::{extract_outputs, param, tags, StackGoal};
use crate::aws::{classify_anyhow_error, AwsContext, CfnClient, Ec2Client, ElbClient, S3Client, SsmClient};
use crate::bootstrap;
use crate::compound_error;
use crate::logs;
use crate::templates;
use crate::wait::{wait_for, WaitConfig};

/// Hard deadline for a single stack create or delete.
pub const STACK_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Settling wait before the second poll of small stacks.
const ROLE_INITIAL_WAIT: Duration = Duration::from_secs(30);
const VPC_INITIAL_WAIT: Duration = Duration::from_secs(30);
/// ASG stacks boot instances; give them longer to settle.
const ASG_INITIAL_WAIT: Duration = Duration::from_secs(60);
/// Budget for the instance inventory reaching the expected size.
const INVENTORY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Result of a create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// All phases ran.
    Created,
    /// The plan was already active; nothing was done.
    AlreadyUp,
}

/// Owns the plan and all service clients for one invocation.
pub struct Deployer {
    pub plan: Plan,
    cfn: CfnClient,
    ec2: Ec2Client,
    s3: S3Client,
    ssm: SsmClient,
    elb: ElbClient,
    cancel: CancellationToken,
}

impl Deployer {
    pub async fn new(plan: Plan, cancel: CancellationToken) -> Result<Self> {
        let aws = AwsContext::new(&plan.region).await;
        Ok(Self {
            cfn: CfnClient::from_context(&aws),
            ec2: Ec2Client::from_context(&aws),
            s3: S3Client::from_context(&aws),
            ssm: SsmClient::from_context(&aws),
            elb: ElbClient::from_context(&aws),
            plan,
            cancel,
        })
    }

    /// Run every create phase, then bootstrap, publish, and collect logs.
    pub async fn create(&mut self) -> Result<CreateOutcome> {
        if self.plan.up {
            info!(name = %self.plan.name, "cluster is already up; nothing to do");
            return Ok(CreateOutcome::AlreadyUp);
        }

        self.plan.time_frame_create.start_now();
        self.plan.record_status(PlanStatus::Creating.to_string())?;

        match self.create_inner().await {
            Ok(()) => {
                self.plan.time_frame_create.end_now();
                self.plan.record_status(PlanStatus::Active.to_string())?;
                info!(
                    name = %self.plan.name,
                    took_seconds = ?self.plan.time_frame_create.took_seconds(),
                    "cluster is up"
                );
                Ok(CreateOutcome::Created)
            }
            Err(e) => {
                self.plan.time_frame_create.end_now();
                let _ = self
                    .plan
                    .record_status(format!("{}: {e:#}", PlanStatus::CreateFailed));

                // A cancellation leaves everything in place for inspection
                // and a later explicit delete.
                if self.cancel.is_cancelled() {
                    warn!("create cancelled; skipping rollback");
                    return Err(e);
                }
                if self.plan.on_failure_delete {
                    let wait = Duration::from_secs(self.plan.on_failure_delete_wait_seconds);
                    warn!(wait = ?wait, "create failed; rolling back");
                    tokio::time::sleep(wait).await;
                    if let Err(rollback_err) = self.delete().await {
                        return Err(compound_error(
                            "create failed and rollback was incomplete",
                            vec![e, rollback_err],
                        ));
                    }
                }
                Err(e)
            }
        }
    }

    async fn create_inner(&mut self) -> Result<()> {
        self.phase_bucket().await?;
        self.phase_role().await?;
        self.phase_vpc().await?;
        self.phase_key_pair().await?;
        self.phase_asgs().await?;
        self.phase_ssm_documents().await?;

        self.plan.record_status("bootstrapping kubernetes")?;
        bootstrap::bootstrap_cluster(&mut self.plan, &self.cancel).await?;

        self.phase_load_balancer().await?;

        if self.plan.asgs_fetch_logs {
            self.plan.record_status("fetching node logs")?;
            let s3 = if self.plan.s3.bucket_name.is_empty() {
                None
            } else {
                Some(&self.s3)
            };
            logs::fetch_logs(&mut self.plan, s3).await?;
        }
        Ok(())
    }

    // ── Create phases ───────────────────────────────────────────────────

    async fn phase_bucket(&mut self) -> Result<()> {
        if !self.plan.s3.bucket_create {
            return Ok(());
        }
        self.plan.record_status("creating s3 bucket")?;
        self.s3.create_bucket(&self.plan.s3.bucket_name).await?;
        if self.plan.s3.bucket_lifecycle_expiration_days > 0 {
            self.s3
                .put_lifecycle_expiration(
                    &self.plan.s3.bucket_name,
                    self.plan.s3.bucket_lifecycle_expiration_days,
                )
                .await?;
        }
        let config_path = self.plan.config_path.clone();
        let key = format!(
            "{}/{}",
            self.plan.s3_dir,
            Path::new(&config_path)
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
        );
        self.upload_artifact(&config_path, &key).await?;
        self.plan.record_status("created s3 bucket")?;
        Ok(())
    }

    async fn phase_role(&mut self) -> Result<()> {
        if !self.plan.role.create {
            info!(arn = %self.plan.role.arn, "reusing existing role");
            return Ok(());
        }
        self.plan.record_status("creating role stack")?;

        let yaml_path = self.plan.role.cfn_stack_yaml_path.clone();
        kite_config::plan::atomic_write(Path::new(&yaml_path), templates::ROLE_TEMPLATE.as_bytes())
            .context("Failed to write role template")?;
        let s3_key = self.plan.role.cfn_stack_yaml_s3_key.clone();
        self.upload_artifact(&yaml_path, &s3_key).await?;

        let mut params = vec![param("RoleName", &self.plan.role.name)];
        if !self.plan.role.service_principals.is_empty() {
            params.push(param(
                "RoleServicePrincipals",
                &self.plan.role.service_principals.join(","),
            ));
        }
        if !self.plan.role.managed_policy_arns.is_empty() {
            params.push(param(
                "RoleManagedPolicyARNs",
                &self.plan.role.managed_policy_arns.join(","),
            ));
        }

        let stack_name = format!("{}-role", self.plan.name);
        let stack_id = self
            .cfn
            .create_stack(
                &stack_name,
                templates::ROLE_TEMPLATE,
                params,
                self.stack_tags()?,
            )
            .await?;
        self.plan.role.cfn_stack_id = stack_id.clone();
        self.plan.sync()?;

        let snapshot = self
            .cfn
            .wait_for(
                &stack_id,
                StackGoal::CreateComplete,
                &self.cancel,
                ROLE_INITIAL_WAIT,
                STACK_TIMEOUT,
            )
            .await?
            .context("role stack wait returned no snapshot")?;
        let outputs = extract_outputs(&snapshot, &["RoleARN"])?;
        self.plan.role.arn = outputs["RoleARN"].clone();
        self.plan.record_status("created role stack")?;
        Ok(())
    }

    async fn phase_vpc(&mut self) -> Result<()> {
        if !self.plan.vpc.create {
            info!(vpc_id = %self.plan.vpc.id, "reusing existing VPC");
            let (subnet_ids, sg_id) = self.ec2.describe_vpc(&self.plan.vpc.id).await?;
            self.plan.vpc.public_subnet_ids = subnet_ids;
            self.plan.vpc.security_group_id = sg_id;
            self.plan.sync()?;
            return Ok(());
        }
        self.plan.record_status("creating vpc stack")?;

        let yaml_path = self.plan.vpc.cfn_stack_yaml_path.clone();
        kite_config::plan::atomic_write(Path::new(&yaml_path), templates::VPC_TEMPLATE.as_bytes())
            .context("Failed to write vpc template")?;
        let s3_key = self.plan.vpc.cfn_stack_yaml_s3_key.clone();
        self.upload_artifact(&yaml_path, &s3_key).await?;

        let mut params = Vec::new();
        if !self.plan.vpc.cidr.is_empty() {
            params.push(param("VPCCIDR", &self.plan.vpc.cidr));
            for (i, cidr) in self.plan.vpc.public_subnet_cidrs.iter().enumerate() {
                params.push(param(&format!("PublicSubnetCIDR{}", i + 1), cidr));
            }
            for (i, cidr) in self.plan.vpc.private_subnet_cidrs.iter().enumerate() {
                params.push(param(&format!("PrivateSubnetCIDR{}", i + 1), cidr));
            }
        }
        if !self.plan.vpc.ssh_ingress_ipv4_range.is_empty() {
            params.push(param(
                "SSHIngressIPv4Range",
                &self.plan.vpc.ssh_ingress_ipv4_range,
            ));
        }

        let stack_name = format!("{}-vpc", self.plan.name);
        let stack_id = self
            .cfn
            .create_stack(&stack_name, templates::VPC_TEMPLATE, params, self.stack_tags()?)
            .await?;
        self.plan.vpc.cfn_stack_id = stack_id.clone();
        self.plan.sync()?;

        let snapshot = self
            .cfn
            .wait_for(
                &stack_id,
                StackGoal::CreateComplete,
                &self.cancel,
                VPC_INITIAL_WAIT,
                STACK_TIMEOUT,
            )
            .await?
            .context("vpc stack wait returned no snapshot")?;
        let outputs = extract_outputs(
            &snapshot,
            &["VPCID", "PublicSubnetIDs", "PrivateSubnetIDs", "SecurityGroupID"],
        )?;
        self.plan.vpc.id = outputs["VPCID"].clone();
        self.plan.vpc.public_subnet_ids = split_ids(&outputs["PublicSubnetIDs"]);
        self.plan.vpc.private_subnet_ids = split_ids(&outputs["PrivateSubnetIDs"]);
        self.plan.vpc.security_group_id = outputs["SecurityGroupID"].clone();
        self.plan.record_status("created vpc stack")?;
        Ok(())
    }

    async fn phase_key_pair(&mut self) -> Result<()> {
        if !self.plan.remote_access.key_create {
            info!(key = %self.plan.remote_access.key_name, "reusing existing key pair");
            return Ok(());
        }
        self.plan.record_status("creating key pair")?;
        let material = self
            .ec2
            .create_key_pair(&self.plan.remote_access.key_name)
            .await?;
        let key_path = &self.plan.remote_access.private_key_path;
        std::fs::write(key_path, material).context("Failed to write private key")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set private key permissions")?;
        }
        self.plan.record_status("created key pair")?;
        Ok(())
    }

    async fn phase_asgs(&mut self) -> Result<()> {
        self.plan.record_status("creating asg stacks")?;

        // Submit sequentially so every stack id is persisted before any
        // polling starts; poll all of them in parallel afterwards.
        let asg_names: Vec<String> = self.plan.asgs.keys().cloned().collect();
        for name in &asg_names {
            let asg = self.plan.asgs[name].clone();
            let body = templates::render_asg_template(&asg)?;
            kite_config::plan::atomic_write(Path::new(&asg.cfn_stack_yaml_path), body.as_bytes())
                .context("Failed to write asg template")?;
            self.upload_artifact(&asg.cfn_stack_yaml_path, &asg.cfn_stack_yaml_s3_key)
                .await?;

            let image_value = if asg.image_id_ssm_parameter.is_empty() {
                asg.image_id.clone()
            } else {
                asg.image_id_ssm_parameter.clone()
            };
            let params = vec![
                param("ASGName", &asg.name),
                param("ImageID", &image_value),
                param("KeyName", &self.plan.remote_access.key_name),
                param("RoleName", &self.plan.role.name),
                param("SecurityGroupID", &self.plan.vpc.security_group_id),
                param("SubnetIDs", &self.plan.vpc.public_subnet_ids.join(",")),
                param("VolumeSize", &asg.volume_size.to_string()),
                param("ASGMinSize", &asg.asg_min_size.to_string()),
                param("ASGMaxSize", &asg.asg_max_size.to_string()),
                param("ASGDesiredCapacity", &asg.asg_desired_capacity.to_string()),
                param("KubernetesVersion", &self.plan.kubeadm.version),
            ];
            let stack_id = self
                .cfn
                .create_stack(&asg.name, &body, params, self.stack_tags()?)
                .await?;
            {
                let entry = self.plan.asgs.get_mut(name).expect("asg disappeared");
                entry.cfn_stack_id = stack_id;
                entry.time_frame_create.start_now();
            }
            self.plan.sync()?;
        }

        let mut set: JoinSet<(String, Result<()>)> = JoinSet::new();
        for name in &asg_names {
            let stack_id = self.plan.asgs[name].cfn_stack_id.clone();
            let cfn = self.cfn.clone();
            let cancel = self.cancel.clone();
            let name = name.clone();
            set.spawn(async move {
                let res = cfn
                    .wait_for(
                        &stack_id,
                        StackGoal::CreateComplete,
                        &cancel,
                        ASG_INITIAL_WAIT,
                        STACK_TIMEOUT,
                    )
                    .await
                    .map(|_| ());
                (name, res)
            });
        }
        let mut first_err: Option<anyhow::Error> = None;
        while let Some(res) = set.join_next().await {
            let (name, res) = res.context("asg stack wait task panicked")?;
            match res {
                Ok(()) => info!(asg = %name, "asg stack complete"),
                Err(e) => {
                    warn!(asg = %name, error = %e, "asg stack failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        // Inventory: wait for every ASG to report its expected node count,
        // then record the instances into the plan.
        for name in &asg_names {
            let (stack_name, expected, user) = {
                let asg = &self.plan.asgs[name];
                (
                    asg.name.clone(),
                    asg.effective_min() as usize,
                    asg.remote_access_user_name.clone(),
                )
            };
            let ec2 = self.ec2.clone();
            wait_for(
                WaitConfig {
                    initial_delay: Duration::from_secs(10),
                    max_delay: Duration::from_secs(30),
                    timeout: INVENTORY_TIMEOUT,
                },
                &self.cancel,
                || {
                    let ec2 = ec2.clone();
                    let stack_name = stack_name.clone();
                    async move {
                        let instances = ec2.stack_instances(&stack_name).await?;
                        let running = instances
                            .iter()
                            .filter(|i| i.state.name == "running" && !i.public_ip.is_empty())
                            .count();
                        Ok(running >= expected)
                    }
                },
                &format!("asg {stack_name} inventory"),
            )
            .await?;

            let mut inventory = BTreeMap::new();
            for mut inst in self.ec2.stack_instances(&stack_name).await? {
                if inst.state.name != "running" {
                    continue;
                }
                inst.remote_access_user_name = user.clone();
                inventory.insert(inst.instance_id.clone(), inst);
            }
            {
                let entry = self.plan.asgs.get_mut(name).expect("asg disappeared");
                entry.instances = inventory;
                entry.time_frame_create.end_now();
            }
            self.plan.sync()?;
            self.plan
                .record_status(format!("created asg {stack_name}"))?;
        }
        Ok(())
    }

    async fn phase_ssm_documents(&mut self) -> Result<()> {
        let asg_names: Vec<String> = self.plan.asgs.keys().cloned().collect();
        for name in &asg_names {
            let asg = self.plan.asgs[name].clone();
            if !asg.ssm.document_create {
                continue;
            }
            self.plan
                .record_status(format!("creating ssm document for {name}"))?;

            let body = templates::render_ssm_template(&asg)?;
            kite_config::plan::atomic_write(
                Path::new(&asg.ssm.cfn_stack_yaml_path),
                body.as_bytes(),
            )
            .context("Failed to write ssm template")?;
            self.upload_artifact(&asg.ssm.cfn_stack_yaml_path, &asg.ssm.cfn_stack_yaml_s3_key)
                .await?;

            let stack_id = self
                .cfn
                .create_stack(
                    &asg.ssm.cfn_stack_name,
                    &body,
                    vec![param("DocumentName", &asg.ssm.document_name)],
                    self.stack_tags()?,
                )
                .await?;
            self.plan
                .asgs
                .get_mut(name)
                .expect("asg disappeared")
                .ssm
                .cfn_stack_id = stack_id.clone();
            self.plan.sync()?;

            let snapshot = self
                .cfn
                .wait_for(
                    &stack_id,
                    StackGoal::CreateComplete,
                    &self.cancel,
                    ROLE_INITIAL_WAIT,
                    STACK_TIMEOUT,
                )
                .await?
                .context("ssm stack wait returned no snapshot")?;
            let outputs = extract_outputs(&snapshot, &["SSMDocumentName"])?;
            let document_name = outputs["SSMDocumentName"].clone();

            let instance_ids: Vec<String> =
                self.plan.asgs[name].instances.keys().cloned().collect();
            let output_bucket = if self.plan.s3.bucket_name.is_empty() {
                None
            } else {
                Some(self.plan.s3.bucket_name.as_str())
            };
            let command_id = self
                .ssm
                .send_command(
                    &document_name,
                    &instance_ids,
                    asg.ssm.document_execution_timeout_seconds,
                    output_bucket,
                    &format!("{}/ssm", self.plan.s3_dir),
                )
                .await?;
            self.plan
                .asgs
                .get_mut(name)
                .expect("asg disappeared")
                .ssm
                .command_ids
                .push(command_id.clone());
            self.plan.sync()?;

            self.ssm
                .wait_for_command(
                    &command_id,
                    &instance_ids,
                    &self.cancel,
                    Duration::from_secs(asg.ssm.document_execution_timeout_seconds as u64),
                )
                .await?;
            self.plan
                .record_status(format!("ssm document complete for {name}"))?;
        }
        Ok(())
    }

    async fn phase_load_balancer(&mut self) -> Result<()> {
        if !self.plan.load_balancer.enable {
            return Ok(());
        }
        self.plan.record_status("creating load balancer")?;

        let control_plane = self
            .plan
            .control_plane_asg()
            .context("no ASGs configured")?;
        let instance_ids: Vec<String> = control_plane.instances.keys().cloned().collect();
        let lb = self
            .elb
            .create(
                &self.plan.load_balancer.name,
                &self.plan.vpc.id,
                &self.plan.vpc.public_subnet_ids,
                &instance_ids,
                &self.cancel,
            )
            .await?;
        self.plan.load_balancer.arn = lb.arn;
        self.plan.load_balancer.target_group_arn = lb.target_group_arn;
        self.plan.load_balancer.url = crate::aws::elb::url_for(&lb.dns_name);
        self.plan.load_balancer.dns_name = lb.dns_name;
        self.plan.record_status("created load balancer")?;
        Ok(())
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Delete everything this plan created, in strict reverse order.
    /// Handles are cleared as each deletion succeeds; reuse-flagged phases
    /// are never deleted. Errors are collected and reported together.
    pub async fn delete(&mut self) -> Result<()> {
        self.plan.time_frame_delete.start_now();
        self.plan.record_status(PlanStatus::Deleting.to_string())?;
        let mut errors: Vec<anyhow::Error> = Vec::new();

        // SSM document stacks.
        let asg_names: Vec<String> = self.plan.asgs.keys().cloned().collect();
        for name in &asg_names {
            let stack_id = self.plan.asgs[name].ssm.cfn_stack_id.clone();
            if stack_id.is_empty() {
                continue;
            }
            match self.delete_stack_and_wait(&stack_id).await {
                Ok(()) => {
                    let ssm = &mut self.plan.asgs.get_mut(name).expect("asg disappeared").ssm;
                    ssm.cfn_stack_id.clear();
                    ssm.command_ids.clear();
                    if let Err(e) = self.plan.sync() {
                        errors.push(e.into());
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        // ASG stacks.
        for name in &asg_names {
            let stack_id = self.plan.asgs[name].cfn_stack_id.clone();
            if stack_id.is_empty() {
                continue;
            }
            self.plan
                .asgs
                .get_mut(name)
                .expect("asg disappeared")
                .time_frame_delete
                .start_now();
            match self.delete_stack_and_wait(&stack_id).await {
                Ok(()) => {
                    let asg = self.plan.asgs.get_mut(name).expect("asg disappeared");
                    asg.cfn_stack_id.clear();
                    asg.instances.clear();
                    asg.time_frame_delete.end_now();
                    if let Err(e) = self.plan.sync() {
                        errors.push(e.into());
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        // Key pair: only one we created.
        if self.plan.remote_access.key_create && !self.plan.remote_access.key_name.is_empty() {
            if let Err(e) = self
                .ec2
                .delete_key_pair(&self.plan.remote_access.key_name)
                .await
            {
                if classify_anyhow_error(&e).is_not_found() {
                    info!("key pair already gone");
                } else {
                    errors.push(e);
                }
            }
        }

        // Load balancer chain (targets -> listeners -> target group -> LB).
        if !self.plan.load_balancer.arn.is_empty()
            || !self.plan.load_balancer.target_group_arn.is_empty()
        {
            let lb = crate::aws::elb::LoadBalancer {
                arn: self.plan.load_balancer.arn.clone(),
                target_group_arn: self.plan.load_balancer.target_group_arn.clone(),
                dns_name: self.plan.load_balancer.dns_name.clone(),
            };
            match self.elb.delete(&lb).await {
                Ok(()) => {
                    self.plan.load_balancer.arn.clear();
                    self.plan.load_balancer.target_group_arn.clear();
                    self.plan.load_balancer.dns_name.clear();
                    self.plan.load_balancer.url.clear();
                    if let Err(e) = self.plan.sync() {
                        errors.push(e.into());
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        // VPC stack; reused VPCs are never deleted.
        if self.plan.vpc.create && !self.plan.vpc.cfn_stack_id.is_empty() {
            let stack_id = self.plan.vpc.cfn_stack_id.clone();
            match self.delete_stack_and_wait(&stack_id).await {
                Ok(()) => {
                    self.plan.vpc.cfn_stack_id.clear();
                    self.plan.vpc.id.clear();
                    self.plan.vpc.public_subnet_ids.clear();
                    self.plan.vpc.private_subnet_ids.clear();
                    self.plan.vpc.security_group_id.clear();
                    if let Err(e) = self.plan.sync() {
                        errors.push(e.into());
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        // Role stack; reused roles are never deleted.
        if self.plan.role.create && !self.plan.role.cfn_stack_id.is_empty() {
            let stack_id = self.plan.role.cfn_stack_id.clone();
            match self.delete_stack_and_wait(&stack_id).await {
                Ok(()) => {
                    self.plan.role.cfn_stack_id.clear();
                    self.plan.role.arn.clear();
                    if let Err(e) = self.plan.sync() {
                        errors.push(e.into());
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        // Bucket: deleted only when created here and not flagged keep.
        if self.plan.s3.bucket_create && !self.plan.s3.bucket_create_keep {
            if let Err(e) = self.s3.delete_bucket(&self.plan.s3.bucket_name).await {
                errors.push(e);
            }
        }

        self.plan.time_frame_delete.end_now();
        self.plan
            .record_status(PlanStatus::DeletedOrNotExist.to_string())?;

        if errors.is_empty() {
            info!(
                took_seconds = ?self.plan.time_frame_delete.took_seconds(),
                "teardown complete"
            );
            Ok(())
        } else {
            Err(compound_error("teardown", errors))
        }
    }

    async fn delete_stack_and_wait(&self, stack_id: &str) -> Result<()> {
        self.cfn.delete_stack(stack_id).await?;
        self.cfn
            .wait_for(
                stack_id,
                StackGoal::DeleteComplete,
                &self.cancel,
                ROLE_INITIAL_WAIT,
                STACK_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Upload a local artifact when a bucket is configured.
    async fn upload_artifact(&self, local_path: &str, key: &str) -> Result<()> {
        if self.plan.s3.bucket_name.is_empty() {
            return Ok(());
        }
        self.s3
            .upload_file(&self.plan.s3.bucket_name, key, Path::new(local_path))
            .await
    }

    fn stack_tags(&self) -> Result<Vec<aws_sdk_cloudformation::types::Tag>> {
        tags(&[
            ("kite:cluster", self.plan.name.as_str()),
            ("kite:tool", "kite"),
        ])
    }
}

/// Split a comma-joined stack output into ids.
fn split_ids(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_ids_handles_spacing_and_empties() {
        assert_eq!(
            split_ids("subnet-1, subnet-2,subnet-3"),
            vec!["subnet-1", "subnet-2", "subnet-3"]
        );
        assert!(split_ids("").is_empty());
    }
}
