/*!

This is the command line interface for previewing, deploying and tearing down the EKS stack.

!*/

mod destroy;
mod output;
mod preview;
mod up;
mod userdata;
mod validate;

use anyhow::{Context, Result};
use clap::Parser;
use eks_stack_providers::aws_registry;
use eks_stack_types::StackConfig;
use log::{debug, LevelFilter};
use resource_provider::{Engine, FileStateStore};
use stack_utils::init_logger;
use std::path::{Path, PathBuf};

/// Deploy an EKS cluster with its network, IAM roles, VPC CNI add-on and a managed node group.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level")]
    log_level: Option<LevelFilter>,
    /// Path to the stack configuration. Every setting has a default, so the file is optional.
    #[clap(long = "config", short = 'c')]
    config: Option<PathBuf>,
    /// Path to the file where the state of the deployed resources is recorded.
    #[clap(long = "state", default_value = "eks-stack.state.json")]
    state: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Show what `up` would change without touching anything.
    Preview(preview::Preview),
    /// Create or update every resource of the stack.
    Up(up::Up),
    /// Delete every recorded resource.
    Destroy(destroy::Destroy),
    /// Print the stack outputs recorded by the last `up`.
    Output(output::Output),
    /// Print the node user data for a cluster.
    Userdata(userdata::Userdata),
    /// Check the configuration and the resource graph it declares.
    Validate(validate::Validate),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(env!("CARGO_CRATE_NAME"), args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let engine = Engine::new(aws_registry(), FileStateStore::new(&args.state));
    match args.command {
        Command::Preview(preview) => preview.run(&config, &engine).await,
        Command::Up(up) => up.run(&config, &engine).await,
        Command::Destroy(destroy) => destroy.run(&config, &engine).await,
        Command::Output(output) => output.run(&engine).await,
        Command::Userdata(userdata) => userdata.run(&engine).await,
        Command::Validate(validate) => validate.run(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<StackConfig> {
    match path {
        Some(path) => {
            debug!("Reading configuration from '{}'", path.display());
            StackConfig::from_path(path)
                .context(format!("Unable to load configuration from '{}'", path.display()))
        }
        None => Ok(StackConfig::default()),
    }
}
