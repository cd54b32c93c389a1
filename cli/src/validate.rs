use anyhow::{Context, Result};
use clap::Parser;
use eks_stack_providers::declare;
use eks_stack_types::StackConfig;
use serde::Serialize;
use stack_utils::impl_display_as_json;

/// Validate the configuration and print the declared resources in creation order.
#[derive(Debug, Parser)]
pub(crate) struct Validate {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Declared {
    region: String,
    resources: Vec<DeclaredResource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeclaredResource {
    name: String,
    kind: String,
    depends_on: Vec<String>,
}

impl_display_as_json!(Declared);

impl Validate {
    pub(crate) fn run(self, config: &StackConfig) -> Result<()> {
        let stack = declare(config).context("The configuration is invalid")?;
        let mut resources = Vec::new();
        for name in stack.creation_layers()?.into_iter().flatten() {
            if let Some(descriptor) = stack.resource(&name) {
                resources.push(DeclaredResource {
                    kind: descriptor.kind().to_string(),
                    depends_on: descriptor.dependencies().into_iter().collect(),
                    name,
                });
            }
        }
        println!(
            "{}",
            Declared {
                region: config.region.clone(),
                resources,
            }
        );
        Ok(())
    }
}
