use anyhow::{Context, Result};
use clap::Parser;
use resource_provider::{Engine, FileStateStore};
use serde_json::Value;

/// Print recorded stack outputs.
#[derive(Debug, Parser)]
pub(crate) struct Output {
    /// The output to print. All outputs are printed as JSON when omitted.
    name: Option<String>,
}

impl Output {
    pub(crate) async fn run(self, engine: &Engine<FileStateStore>) -> Result<()> {
        let outputs = engine.outputs().await.context("Unable to read the state")?;
        match self.name {
            None => println!("{}", stack_utils::json_display(&outputs)),
            Some(name) => match outputs.get(&name) {
                Some(Value::String(value)) => println!("{}", value),
                Some(value) => println!("{}", value),
                None => anyhow::bail!("No output named '{}' has been recorded", name),
            },
        }
        Ok(())
    }
}
