//! End-to-end create/delete against a real AWS account.
//!
//! These provision real resources and cost money; they only run with
//! credentials and an explicit `--ignored`:
//!
//! ```bash
//! cargo test -p kite-deployer --test aws_integration -- --ignored --test-threads=1
//! ```

use std::time::Duration;

use kite_config::Plan;
use kite_deployer::deploy::{CreateOutcome, Deployer};
use tokio_util::sync::CancellationToken;

fn test_plan(dir: &tempfile::TempDir) -> Plan {
    let mut plan = Plan::new_default();
    plan.config_path = dir
        .path()
        .join(format!("{}.yaml", plan.name))
        .to_string_lossy()
        .into_owned();
    // Keep the footprint small: one single-node ASG, no artifact retention.
    plan.s3.bucket_create_keep = false;
    plan.on_failure_delete = true;
    plan.on_failure_delete_wait_seconds = 30;
    plan.update_from_envs().unwrap();
    plan.validate_and_set_defaults().unwrap();
    plan
}

#[tokio::test]
#[ignore = "requires AWS credentials and provisions real resources"]
async fn fresh_create_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let plan = test_plan(&dir);
    let cancel = CancellationToken::new();

    let mut deployer = Deployer::new(plan, cancel).await.unwrap();
    let outcome = deployer.create().await.unwrap();
    assert_eq!(outcome, CreateOutcome::Created);

    // Scenario: one ASG, one node, every handle populated.
    let plan = &deployer.plan;
    assert_eq!(plan.total_nodes, 1);
    assert!(!plan.role.arn.is_empty());
    assert!(!plan.vpc.id.is_empty());
    let asg = plan.asgs.values().next().unwrap();
    assert_eq!(asg.instances.len(), 1);
    assert!(asg
        .instances
        .values()
        .all(|i| i.state.name == "running"));
    assert!(plan.up);
    assert!(!plan.kubeadm.join_token.is_empty());

    deployer.delete().await.unwrap();
    let plan = &deployer.plan;
    assert!(plan.role.cfn_stack_id.is_empty());
    assert!(plan.vpc.cfn_stack_id.is_empty());
    assert!(plan.asgs.values().all(|a| a.cfn_stack_id.is_empty()));
    assert!(!plan.up);
    assert_eq!(plan.status_current, "deleted/not-exist");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn create_twice_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let plan = test_plan(&dir);
    let cancel = CancellationToken::new();

    let mut deployer = Deployer::new(plan, cancel).await.unwrap();
    deployer.create().await.unwrap();
    assert_eq!(deployer.create().await.unwrap(), CreateOutcome::AlreadyUp);
    deployer.delete().await.unwrap();
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn reuse_mode_teardown_keeps_handles() {
    // Requires pre-existing resources named via env:
    //   KITE_ROLE_ARN, KITE_VPC_ID, KITE_REMOTE_ACCESS_KEY_NAME,
    //   KITE_REMOTE_ACCESS_PRIVATE_KEY_PATH
    let dir = tempfile::tempdir().unwrap();
    let mut plan = Plan::new_default();
    plan.config_path = dir
        .path()
        .join(format!("{}.yaml", plan.name))
        .to_string_lossy()
        .into_owned();
    plan.role.create = false;
    plan.vpc.create = false;
    plan.remote_access.key_create = false;
    plan.update_from_envs().unwrap();
    plan.validate_and_set_defaults().unwrap();

    let role_arn = plan.role.arn.clone();
    let vpc_id = plan.vpc.id.clone();
    let key_name = plan.remote_access.key_name.clone();

    let cancel = CancellationToken::new();
    let mut deployer = Deployer::new(plan, cancel).await.unwrap();
    deployer.create().await.unwrap();
    deployer.delete().await.unwrap();

    // Reused handles survive teardown untouched.
    assert_eq!(deployer.plan.role.arn, role_arn);
    assert_eq!(deployer.plan.vpc.id, vpc_id);
    assert_eq!(deployer.plan.remote_access.key_name, key_name);
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn cancellation_leaves_stacks_intact() {
    let dir = tempfile::tempdir().unwrap();
    let plan = test_plan(&dir);
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        // Cancel mid-provisioning; no rollback may run.
        tokio::time::sleep(Duration::from_secs(120)).await;
        canceller.cancel();
    });

    let mut deployer = Deployer::new(plan, cancel).await.unwrap();
    let err = deployer.create().await.unwrap_err();
    assert!(format!("{err:#}").to_lowercase().contains("cancel"));

    // Whatever was created is still recorded; explicit delete cleans up.
    deployer.delete().await.unwrap();
}
