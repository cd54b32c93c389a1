use anyhow::{Context, Result};
use clap::Parser;
use eks_stack_providers::declare;
use eks_stack_types::StackConfig;
use log::info;
use resource_provider::{Engine, FileStateStore};

/// Bring the cloud in line with the declared stack.
#[derive(Debug, Parser)]
pub(crate) struct Up {
    /// Output the report in JSON format.
    #[clap(long = "json")]
    json: bool,
}

impl Up {
    pub(crate) async fn run(
        self,
        config: &StackConfig,
        engine: &Engine<FileStateStore>,
    ) -> Result<()> {
        let stack = declare(config).context("Unable to declare the stack")?;
        info!(
            "Deploying {} resources to '{}'",
            stack.resources().len(),
            config.region
        );
        let report = engine
            .apply(&stack)
            .await
            .context("Unable to apply the stack")?;
        if self.json {
            println!("{}", stack_utils::json_display(&report));
        } else {
            println!("{}", report);
        }
        if !report.is_success() {
            anyhow::bail!(
                "{} resource(s) failed and {} were skipped; completed resources were kept",
                report.failed().len(),
                report.skipped.len()
            );
        }
        Ok(())
    }
}
