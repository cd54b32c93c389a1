use super::check_name;
use crate::arn::Arn;
use configuration_derive::Configuration;
use serde::{Deserialize, Serialize};
use stack_model::{Output, Resource, ResourceKind};
use std::str::FromStr;

/// An EKS control plane.
pub struct Cluster;

impl ResourceKind for Cluster {
    const TYPE: &'static str = "aws:eks:Cluster";
    const REPLACE_ON_CHANGES: &'static [&'static str] =
        &["/name", "/roleArn", "/resourcesVpcConfig/subnetIds"];

    type Args = ClusterArgs;
    type Attributes = ClusterAttributes;

    fn validate(args: &ClusterArgs) -> Result<(), String> {
        if let Some(name) = &args.name {
            check_name("cluster name", name, 100)?;
        }
        Arn::from_str(&args.role_arn).map_err(|e| e.to_string())?;
        if args.version.split('.').count() != 2
            || !args.version.split('.').all(|part| part.parse::<u32>().is_ok())
        {
            return Err(format!(
                "'{}' is not a Kubernetes minor version",
                args.version
            ));
        }
        let vpc = &args.resources_vpc_config;
        if vpc.subnet_ids.len() < 2 {
            return Err("a cluster needs subnets in at least two zones".to_string());
        }
        if !vpc.endpoint_public_access && !vpc.endpoint_private_access {
            return Err("at least one cluster endpoint must be enabled".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role_arn: String,
    pub version: String,
    pub resources_vpc_config: ResourcesVpcConfig,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesVpcConfig {
    pub subnet_ids: Vec<String>,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAttributes {
    pub name: String,
    pub arn: String,
    pub endpoint: String,
    pub certificate_authority_data: String,
    pub open_id_connect_issuer_url: String,
    pub cluster_security_group_id: String,
    pub version: String,
}

pub trait ClusterOutputs {
    fn cluster_name(&self) -> Output<String>;
    fn arn(&self) -> Output<String>;
    fn open_id_connect_issuer_url(&self) -> Output<String>;
    fn cluster_security_group_id(&self) -> Output<String>;
}

impl ClusterOutputs for Resource<Cluster> {
    fn cluster_name(&self) -> Output<String> {
        self.attribute("name")
    }

    fn arn(&self) -> Output<String> {
        self.attribute("arn")
    }

    fn open_id_connect_issuer_url(&self) -> Output<String> {
        self.attribute("openIdConnectIssuerUrl")
    }

    fn cluster_security_group_id(&self) -> Output<String> {
        self.attribute("clusterSecurityGroupId")
    }
}

/// A managed EKS add-on such as `vpc-cni`.
pub struct Addon;

impl ResourceKind for Addon {
    const TYPE: &'static str = "aws:eks:Addon";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &["/clusterName", "/addonName"];

    type Args = AddonArgs;
    type Attributes = AddonAttributes;

    fn validate(args: &AddonArgs) -> Result<(), String> {
        if args.cluster_name.is_empty() || args.addon_name.is_empty() {
            return Err("an add-on needs a cluster name and an add-on name".to_string());
        }
        if let Some(role) = &args.service_account_role_arn {
            Arn::from_str(role).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct AddonArgs {
    pub cluster_name: String,
    pub addon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addon_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_role_arn: Option<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct AddonAttributes {
    pub arn: String,
    pub addon_version: String,
}

pub trait AddonOutputs {
    fn arn(&self) -> Output<String>;
}

impl AddonOutputs for Resource<Addon> {
    fn arn(&self) -> Output<String> {
        self.attribute("arn")
    }
}

/// A managed node group launched from a launch template.
pub struct Nodegroup;

impl ResourceKind for Nodegroup {
    const TYPE: &'static str = "aws:eks:Nodegroup";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &[
        "/nodegroupName",
        "/clusterName",
        "/nodeRole",
        "/subnets",
        "/capacityType",
    ];

    type Args = NodegroupArgs;
    type Attributes = NodegroupAttributes;

    fn validate(args: &NodegroupArgs) -> Result<(), String> {
        if let Some(name) = &args.nodegroup_name {
            check_name("node group name", name, 63)?;
        }
        Arn::from_str(&args.node_role).map_err(|e| e.to_string())?;
        if args.subnets.is_empty() {
            return Err("a node group needs at least one subnet".to_string());
        }
        if args.capacity_type != "ON_DEMAND" && args.capacity_type != "SPOT" {
            return Err(format!("unknown capacity type '{}'", args.capacity_type));
        }
        if args.launch_template.name.is_empty() || args.launch_template.version.is_empty() {
            return Err("the launch template name and version must be set".to_string());
        }
        args.scaling_config.validate()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodegroup_name: Option<String>,
    pub cluster_name: String,
    pub capacity_type: String,
    pub node_role: String,
    pub launch_template: LaunchTemplateSpecification,
    pub subnets: Vec<String>,
    pub scaling_config: ScalingConfig,
}

/// A launch template pinned to one version.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateSpecification {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub desired_size: i32,
    pub min_size: i32,
    pub max_size: i32,
}

impl ScalingConfig {
    pub fn validate(&self) -> Result<(), String> {
        crate::config::Scaling {
            desired_size: self.desired_size,
            min_size: self.min_size,
            max_size: self.max_size,
        }
        .validate()
    }
}

impl From<crate::config::Scaling> for ScalingConfig {
    fn from(scaling: crate::config::Scaling) -> Self {
        Self {
            desired_size: scaling.desired_size,
            min_size: scaling.min_size,
            max_size: scaling.max_size,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupAttributes {
    pub nodegroup_name: String,
    pub arn: String,
    /// The launch template version the node group is running.
    pub launch_template_version: String,
}

pub trait NodegroupOutputs {
    fn nodegroup_name(&self) -> Output<String>;
    fn launch_template_version(&self) -> Output<String>;
}

impl NodegroupOutputs for Resource<Nodegroup> {
    fn nodegroup_name(&self) -> Output<String> {
        self.attribute("nodegroupName")
    }

    fn launch_template_version(&self) -> Output<String> {
        self.attribute("launchTemplateVersion")
    }
}
