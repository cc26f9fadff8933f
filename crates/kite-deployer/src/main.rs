//! kite: provision EC2-backed Kubernetes clusters for e2e testing.
//!
//! Thin CLI over the deployer library. The plan file is the sole persistent
//! state; `create` and `delete` both load it, overlay `KITE_*` environment
//! variables, validate, and run.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use kite_config::Plan;
use kite_deployer::deploy::{CreateOutcome, Deployer};
use kite_deployer::wait::signal_cancel_token;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser, Debug)]
#[command(name = "kite")]
#[command(about = "EC2 + kubeadm cluster provisioner for e2e testing")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the cluster described by the plan file
    Create {
        /// Plan file path; created with defaults if missing
        #[arg(short, long)]
        path: String,
    },

    /// Tear down everything the plan created
    Delete {
        /// Plan file path
        #[arg(short, long)]
        path: String,
    },
}

/// Load (or default) the plan, overlay the environment, validate.
fn load_plan(path: &str) -> Result<Plan> {
    let mut plan = if std::path::Path::new(path).exists() {
        Plan::load(path)?
    } else {
        let mut plan = Plan::new_default();
        plan.config_path = path.to_string();
        plan
    };
    plan.update_from_envs()?;
    plan.validate_and_set_defaults()?;
    Ok(plan)
}

fn init_tracing(cluster_name: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let log_path = std::env::temp_dir().join(format!("{cluster_name}.log"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("failed to open log mirror");
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Create { path } => {
            let plan = load_plan(&path)?;
            let _guard = init_tracing(&plan.name);
            info!(name = %plan.name, region = %plan.region, nodes = plan.total_nodes, "creating cluster");

            let cancel = signal_cancel_token();
            let mut deployer = Deployer::new(plan, cancel).await?;
            match deployer.create().await? {
                CreateOutcome::AlreadyUp => info!("cluster already active"),
                CreateOutcome::Created => {
                    info!(
                        kubeconfig = %deployer.plan.kubeadm.kubeconfig_path,
                        ssh_commands = %deployer.plan.remote_access.commands_output_path,
                        "cluster created"
                    );
                }
            }
        }

        Command::Delete { path } => {
            let plan = Plan::load(&path).context("delete requires an existing plan file")?;
            let _guard = init_tracing(&plan.name);
            info!(name = %plan.name, region = %plan.region, "deleting cluster");

            let cancel = signal_cancel_token();
            let mut deployer = Deployer::new(plan, cancel).await?;
            deployer.delete().await?;
            info!("cluster deleted");
        }
    }

    Ok(())
}
