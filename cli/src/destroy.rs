use anyhow::{Context, Result};
use clap::Parser;
use eks_stack_providers::declare;
use eks_stack_types::StackConfig;
use resource_provider::{Engine, FileStateStore};

/// Delete every recorded resource, dependents first.
#[derive(Debug, Parser)]
pub(crate) struct Destroy {}

impl Destroy {
    pub(crate) async fn run(
        self,
        config: &StackConfig,
        engine: &Engine<FileStateStore>,
    ) -> Result<()> {
        // The declaration supplies the account and region to delete from.
        let stack = declare(config).context("Unable to declare the stack")?;
        let report = engine
            .destroy(&stack)
            .await
            .context("Unable to destroy the stack")?;
        println!("{}", report);
        if !report.is_success() {
            anyhow::bail!(
                "{} deletion(s) failed; '{}' still records what is left",
                report.failed().len(),
                engine.store().path().display()
            );
        }
        Ok(())
    }
}
