//! Generated SSH command snippet.
//!
//! Written next to the plan file on every sync so an operator can copy-paste
//! their way onto any node of the cluster.

use crate::plan::{Asg, Plan};

const HEADER: &str = "#!/bin/bash\nset -e\nset -x\n\n";

/// Render the full `<name>.ssh.sh` snippet: one block per ASG, one entry per
/// instance, prefixed by a `chmod 400` of the private key.
pub fn ssh_commands(plan: &Plan) -> String {
    let mut out = String::from(HEADER);
    if plan.asgs.is_empty() {
        return out;
    }
    out.push('\n');
    for (name, asg) in &plan.asgs {
        out.push_str(&format!("# ASG {name:?}:\n"));
        out.push_str(&asg_ssh_commands(
            asg,
            &plan.region,
            &plan.remote_access.private_key_path,
        ));
        out.push('\n');
    }
    out
}

fn asg_ssh_commands(asg: &Asg, region: &str, key_path: &str) -> String {
    if asg.instances.is_empty() {
        return format!("# empty ASG {:?}\n", asg.name);
    }
    let user = &asg.remote_access_user_name;
    let mut s = format!("\n# change SSH key permission\nchmod 400 {key_path}\n");
    for inst in asg.instances.values() {
        s.push_str(&format!(
            r#"# SSH into the remote machine (instance ID {id:?}, public IP {pub_ip:?}, private IP {priv_ip:?})
ssh -o "StrictHostKeyChecking no" -i {key_path} {user}@{dns}
# download to local machine
scp -i {key_path} {user}@{dns}:REMOTE_FILE_PATH LOCAL_FILE_PATH
# upload to remote machine
scp -i {key_path} LOCAL_FILE_PATH {user}@{dns}:REMOTE_FILE_PATH
# SSM session (requires SSM agent)
aws ssm --region {region} start-session --target {id}

"#,
            id = inst.instance_id,
            pub_ip = inst.public_ip,
            priv_ip = inst.private_ip,
            dns = inst.public_dns_name,
        ));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Instance;

    #[test]
    fn empty_asg_renders_placeholder() {
        let mut plan = Plan::new_default();
        plan.region = "us-west-2".into();
        let out = ssh_commands(&plan);
        assert!(out.starts_with("#!/bin/bash"));
        assert!(out.contains("# empty ASG"));
    }

    #[test]
    fn instance_block_contains_ssh_scp_and_ssm() {
        let mut plan = Plan::new_default();
        plan.region = "us-west-2".into();
        plan.remote_access.private_key_path = "/tmp/k.key".into();
        let asg = plan.asgs.values_mut().next().unwrap();
        asg.remote_access_user_name = "ec2-user".into();
        asg.instances.insert(
            "i-0123".into(),
            Instance {
                instance_id: "i-0123".into(),
                public_dns_name: "ec2-1-2-3-4.us-west-2.compute.amazonaws.com".into(),
                public_ip: "1.2.3.4".into(),
                private_ip: "10.0.0.4".into(),
                ..Default::default()
            },
        );

        let out = ssh_commands(&plan);
        assert!(out.contains("chmod 400 /tmp/k.key"));
        assert!(out.contains("ssh -o \"StrictHostKeyChecking no\" -i /tmp/k.key ec2-user@ec2-1-2-3-4.us-west-2.compute.amazonaws.com"));
        assert!(out.contains("scp -i /tmp/k.key"));
        assert!(out.contains("aws ssm --region us-west-2 start-session --target i-0123"));
    }
}
