/*!

The stack configuration file. Every field has a default, so an empty document declares the
reference stack: a three-zone VPC, a 1.29 cluster and two `m5.large` on-demand nodes.

!*/

use crate::error::{self, Result};
use crate::network::{AddressPlan, Ipv4Cidr, MAX_VPC_PREFIX};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use stack_model::{ProviderContext, DEFAULT_REGION};
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_KUBERNETES_VERSION: &str = "1.29";
/// amazon-eks-node-1.29-v20240928
pub const DEFAULT_IMAGE_ID: &str = "ami-02561a005c32adc67";
pub const DEFAULT_INSTANCE_TYPE: &str = "m5.large";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StackConfig {
    pub region: String,
    pub profile: Option<String>,
    pub assume_role: Option<String>,
    pub names: Names,
    pub network: Network,
    pub cluster: Cluster,
    pub nodes: Nodes,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            profile: None,
            assume_role: None,
            names: Names::default(),
            network: Network::default(),
            cluster: Cluster::default(),
            nodes: Nodes::default(),
        }
    }
}

/// Logical names of the stack's resources. The cluster role is the only one with a fixed
/// physical name too.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Names {
    pub vpc: String,
    pub cluster_role: String,
    pub cluster_role_name: String,
    pub cluster: String,
    pub oidc_provider: String,
    pub cni_role: String,
    pub cni_addon: String,
    pub node_role: String,
    pub launch_template: String,
    pub nodegroup: String,
}

impl Default for Names {
    fn default() -> Self {
        Self {
            vpc: "vpc-repro-1747".to_string(),
            cluster_role: "eks-role-1747".to_string(),
            cluster_role_name: "eks-role-1747".to_string(),
            cluster: "eks-1747".to_string(),
            oidc_provider: "oidc-provider-1747".to_string(),
            cni_role: "vpc-cni-role".to_string(),
            cni_addon: "vpc-cni-addon".to_string(),
            node_role: "nodes-role".to_string(),
            launch_template: "cluster-launch-template".to_string(),
            nodegroup: "managed-nodes".to_string(),
        }
    }
}

impl Names {
    fn all(&self) -> [&str; 9] {
        [
            &self.vpc,
            &self.cluster_role,
            &self.cluster,
            &self.oidc_provider,
            &self.cni_role,
            &self.cni_addon,
            &self.node_role,
            &self.launch_template,
            &self.nodegroup,
        ]
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Network {
    pub cidr_block: String,
    pub availability_zones: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            cidr_block: "10.0.0.0/16".to_string(),
            availability_zones: 3,
        }
    }
}

impl Network {
    pub fn address_plan(&self) -> Result<AddressPlan> {
        AddressPlan::new(Ipv4Cidr::from_str(&self.cidr_block)?, self.availability_zones)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Cluster {
    pub version: String,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            version: DEFAULT_KUBERNETES_VERSION.to_string(),
            endpoint_public_access: true,
            endpoint_private_access: true,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Nodes {
    pub instance_type: String,
    pub image_id: String,
    pub capacity_type: String,
    pub root_volume: RootVolume,
    pub scaling: Scaling,
    pub replacement: NodeReplacementPolicy,
}

impl Default for Nodes {
    fn default() -> Self {
        Self {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            image_id: DEFAULT_IMAGE_ID.to_string(),
            capacity_type: "ON_DEMAND".to_string(),
            root_volume: RootVolume::default(),
            scaling: Scaling::default(),
            replacement: NodeReplacementPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RootVolume {
    pub device_name: String,
    pub volume_type: String,
    pub volume_size: i32,
    pub iops: i32,
    pub throughput: i32,
}

impl Default for RootVolume {
    fn default() -> Self {
        Self {
            device_name: "/dev/xvda".to_string(),
            volume_type: "gp3".to_string(),
            volume_size: 80,
            iops: 3000,
            throughput: 125,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Scaling {
    pub desired_size: i32,
    pub min_size: i32,
    pub max_size: i32,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            desired_size: 2,
            min_size: 2,
            max_size: 3,
        }
    }
}

impl Scaling {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_size < 0 {
            return Err(format!("minSize must not be negative, got {}", self.min_size));
        }
        if self.max_size < 1 {
            return Err(format!("maxSize must be at least 1, got {}", self.max_size));
        }
        if !(self.min_size <= self.desired_size && self.desired_size <= self.max_size) {
            return Err(format!(
                "scaling must satisfy minSize <= desiredSize <= maxSize, got {} <= {} <= {}",
                self.min_size, self.desired_size, self.max_size
            ));
        }
        Ok(())
    }
}

/// What happens to running nodes when the launch template gets a new version.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeReplacementPolicy {
    /// The node group keeps its identity and moves to the new version with an in-place version
    /// update. EKS rolls the instances itself, one batch at a time, and a roll that fails leaves
    /// the group running the old version until the next apply.
    AcceptDrift,
    /// A version change replaces the whole node group, creating the new one first.
    ReplaceOnTemplateVersionChange,
}

impl Default for NodeReplacementPolicy {
    fn default() -> Self {
        Self::AcceptDrift
    }
}

serde_plain::derive_display_from_serialize!(NodeReplacementPolicy);

/// Sections of the document that must be maps. serde also accepts a sequence for a struct and
/// assigns its items to fields by position.
const SECTIONS: &[&[&str]] = &[
    &["names"],
    &["network"],
    &["cluster"],
    &["nodes"],
    &["nodes", "rootVolume"],
    &["nodes", "scaling"],
];

fn section<'a>(document: &'a serde_yaml::Value, path: &[&str]) -> Option<&'a serde_yaml::Value> {
    path.iter().try_fold(document, |value, key| value.get(*key))
}

impl StackConfig {
    /// Parse a YAML document. Unknown keys are rejected, so a misspelled field is an error
    /// instead of a silent default.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: serde_yaml::Value =
            serde_yaml::from_str(yaml).context(error::ParseConfigSnafu)?;
        ensure!(
            document.is_mapping(),
            error::InvalidConfigSnafu {
                message: "the configuration must be a map",
            }
        );
        for path in SECTIONS {
            if let Some(value) = section(&document, path) {
                ensure!(
                    value.is_mapping(),
                    error::InvalidConfigSnafu {
                        message: format!("'{}' must be a map", path.join(".")),
                    }
                );
            }
        }
        serde_yaml::from_value(document).context(error::ParseConfigSnafu)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            error::InvalidConfigSnafu {
                message: format!("unable to read '{}': {}", path.display(), e),
            }
            .build()
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(error::ParseConfigSnafu)
    }

    pub fn provider_context(&self) -> ProviderContext {
        ProviderContext {
            region: self.region.clone(),
            profile: self.profile.clone(),
            assume_role: self.assume_role.clone(),
        }
    }

    /// Reject configurations that AWS would refuse after part of the stack already exists.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| error::InvalidConfigSnafu { message }.build();

        ensure!(
            !self.region.is_empty(),
            error::InvalidConfigSnafu {
                message: "region must not be empty",
            }
        );
        if let Some(role) = &self.assume_role {
            crate::Arn::from_str(role)?;
        }

        let names = self.names.all();
        for (i, name) in names.iter().enumerate() {
            ensure!(
                !name.is_empty(),
                error::InvalidConfigSnafu {
                    message: "resource names must not be empty",
                }
            );
            ensure!(
                !names[..i].contains(name),
                error::InvalidConfigSnafu {
                    message: format!("resource name '{}' is used twice", name),
                }
            );
        }
        ensure!(
            !self.names.cluster_role_name.is_empty() && self.names.cluster_role_name.len() <= 64,
            error::InvalidConfigSnafu {
                message: "clusterRoleName must be between 1 and 64 characters",
            }
        );

        let cidr = Ipv4Cidr::from_str(&self.network.cidr_block)?;
        ensure!(
            cidr.prefix() <= MAX_VPC_PREFIX,
            error::CidrSnafu {
                cidr: &self.network.cidr_block,
                reason: format!("the VPC block must be /{} or larger", MAX_VPC_PREFIX),
            }
        );
        ensure!(
            (2..=6).contains(&self.network.availability_zones),
            error::InvalidConfigSnafu {
                message: format!(
                    "availabilityZones must be between 2 and 6, got {}",
                    self.network.availability_zones
                ),
            }
        );
        self.network.address_plan()?;

        ensure!(
            !self.cluster.version.is_empty(),
            error::InvalidConfigSnafu {
                message: "cluster version must not be empty",
            }
        );
        ensure!(
            self.cluster.endpoint_public_access || self.cluster.endpoint_private_access,
            error::InvalidConfigSnafu {
                message: "at least one cluster endpoint must be enabled",
            }
        );

        let nodes = &self.nodes;
        ensure!(
            nodes.image_id.starts_with("ami-") && nodes.image_id.len() > 4,
            error::InvalidConfigSnafu {
                message: format!("'{}' is not an AMI id", nodes.image_id),
            }
        );
        ensure!(
            !nodes.instance_type.is_empty(),
            error::InvalidConfigSnafu {
                message: "instanceType must not be empty",
            }
        );
        ensure!(
            nodes.capacity_type == "ON_DEMAND" || nodes.capacity_type == "SPOT",
            error::InvalidConfigSnafu {
                message: format!(
                    "capacityType must be ON_DEMAND or SPOT, got '{}'",
                    nodes.capacity_type
                ),
            }
        );
        ensure!(
            nodes.root_volume.volume_size > 0,
            error::InvalidConfigSnafu {
                message: "rootVolume.volumeSize must be positive",
            }
        );
        nodes.scaling.validate().map_err(invalid)?;
        Ok(())
    }
}
