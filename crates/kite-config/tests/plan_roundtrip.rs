//! Round-trip stability of the plan file.
//!
//! The YAML on disk is the sole persistent state, so load(sync(p)) must
//! reproduce p for every representable plan.

use kite_config::Plan;

fn plan_in(dir: &tempfile::TempDir, stem: &str) -> Plan {
    let mut plan = Plan::new_default();
    plan.config_path = dir
        .path()
        .join(format!("{stem}.yaml"))
        .to_string_lossy()
        .into_owned();
    plan
}

#[test]
fn validated_plan_survives_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan_in(&dir, "roundtrip");
    plan.s3.bucket_lifecycle_expiration_days = 7;
    plan.vpc.ssh_ingress_ipv4_range = "192.0.2.0/24".to_string();
    plan.validate_and_set_defaults().unwrap();

    let loaded = Plan::load(&plan.config_path).unwrap();
    assert_eq!(
        serde_yaml::to_string(&plan).unwrap(),
        serde_yaml::to_string(&loaded).unwrap()
    );
}

#[test]
fn env_overlay_then_validate_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan_in(&dir, "env-roundtrip");
    plan.apply_env_overlay(&[
        ("KITE_REGION".to_string(), "us-east-2".to_string()),
        (
            "KITE_ASGS".to_string(),
            r#"{"t-asg":{"name":"t-asg","ami-type":"AL2_x86_64","image-id":"ami-1","instance-types":["c5.xlarge"],"asg-min-size":1,"asg-max-size":1,"asg-desired-capacity":1}}"#
                .to_string(),
        ),
    ])
    .unwrap();
    plan.validate_and_set_defaults().unwrap();
    assert_eq!(plan.total_nodes, 1);

    let loaded = Plan::load(&plan.config_path).unwrap();
    assert_eq!(loaded.region, "us-east-2");
    assert_eq!(loaded.asgs["t-asg"].image_id, "ami-1");
    assert_eq!(
        serde_yaml::to_string(&plan).unwrap(),
        serde_yaml::to_string(&loaded).unwrap()
    );
}

#[test]
fn status_mutations_persist_through_reload() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan_in(&dir, "status");
    plan.validate_and_set_defaults().unwrap();

    plan.record_status("creating").unwrap();
    plan.record_status("active").unwrap();

    let loaded = Plan::load(&plan.config_path).unwrap();
    assert!(loaded.up);
    assert_eq!(loaded.status_current, "active");
    assert_eq!(loaded.status.len(), 2);
    assert_eq!(loaded.status[0].status, "active");
}

#[test]
fn mutated_handles_persist_through_reload() {
    let dir = tempfile::tempdir().unwrap();
    let mut plan = plan_in(&dir, "handles");
    plan.validate_and_set_defaults().unwrap();

    plan.role.cfn_stack_id = "arn:aws:cloudformation:stack/role/1".to_string();
    plan.role.arn = "arn:aws:iam::123456789012:role/kite".to_string();
    plan.vpc.id = "vpc-01234".to_string();
    plan.sync().unwrap();

    let loaded = Plan::load(&plan.config_path).unwrap();
    assert_eq!(loaded.role.cfn_stack_id, "arn:aws:cloudformation:stack/role/1");
    assert_eq!(loaded.role.arn, "arn:aws:iam::123456789012:role/kite");
    assert_eq!(loaded.vpc.id, "vpc-01234");
}
