use anyhow::{Context, Result};
use clap::Parser;
use eks_stack_providers::declare;
use eks_stack_types::StackConfig;
use resource_provider::{Engine, FileStateStore};

/// Compare the declared stack with the recorded state.
#[derive(Debug, Parser)]
pub(crate) struct Preview {
    /// Output the plan in JSON format.
    #[clap(long = "json")]
    json: bool,
}

impl Preview {
    pub(crate) async fn run(
        self,
        config: &StackConfig,
        engine: &Engine<FileStateStore>,
    ) -> Result<()> {
        let stack = declare(config).context("Unable to declare the stack")?;
        let plan = engine
            .preview(&stack)
            .await
            .context("Unable to compute the plan")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Could not create string from plan.")?
            );
        } else {
            println!("{}", plan);
        }
        Ok(())
    }
}
