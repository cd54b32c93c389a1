use anyhow::{Context, Result};
use clap::Parser;
use eks_stack_providers::CLUSTER_NAME_OUTPUT;
use eks_stack_types::userdata;
use resource_provider::{Engine, FileStateStore};

/// Render the MIME multipart user data that joins nodes to a cluster.
#[derive(Debug, Parser)]
pub(crate) struct Userdata {
    /// The cluster to join. Defaults to the recorded `cluster_name` output.
    #[clap(long = "cluster-name")]
    cluster_name: Option<String>,

    /// Print the base64 encoding that is placed in the launch template.
    #[clap(long = "encoded")]
    encoded: bool,
}

impl Userdata {
    pub(crate) async fn run(self, engine: &Engine<FileStateStore>) -> Result<()> {
        let cluster_name = match self.cluster_name {
            Some(name) => name,
            None => engine
                .outputs()
                .await
                .context("Unable to read the state")?
                .get(CLUSTER_NAME_OUTPUT)
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .context("No cluster has been recorded, pass --cluster-name")?,
        };
        if self.encoded {
            println!("{}", userdata::encode(&cluster_name));
        } else {
            print!("{}", userdata::render(&cluster_name));
        }
        Ok(())
    }
}
