use crate::error::{self, Result};
use eks_stack_types::config::NodeReplacementPolicy;
use eks_stack_types::kinds::{
    Addon, AddonArgs, BlockDeviceMapping, Cluster, ClusterArgs, ClusterOutputs, Ebs,
    LaunchTemplate, LaunchTemplateArgs, LaunchTemplateData, LaunchTemplateOutputs,
    LaunchTemplateSpecification, Nodegroup, NodegroupArgs, OidcProvider, OidcProviderArgs,
    OidcProviderOutputs, ResourcesVpcConfig, Role, RoleArgs, RoleOutputs, ScalingConfig, Vpc,
    VpcArgs, VpcOutputs, EKS_OIDC_THUMBPRINT,
};
use eks_stack_types::network::cluster_subnets;
use eks_stack_types::trust::{PolicyDocument, STS_AUDIENCE};
use eks_stack_types::{userdata, StackConfig};
use log::debug;
use snafu::ResultExt;
use stack_model::{Output, ResourceOptions, Stack};

pub const CLUSTER_NAME_OUTPUT: &str = "cluster_name";

const EKS_SERVICE: &str = "eks.amazonaws.com";
const EC2_SERVICE: &str = "ec2.amazonaws.com";
const VPC_CNI_ADDON: &str = "vpc-cni";

const CLUSTER_POLICIES: &[&str] = &[
    "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy",
    "arn:aws:iam::aws:policy/AmazonEKSVPCResourceController",
];
const CNI_POLICIES: &[&str] = &["arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy"];
const NODE_POLICIES: &[&str] = &[
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
];

fn policies(arns: &[&str]) -> Vec<String> {
    arns.iter().map(|arn| arn.to_string()).collect()
}

/// Declare the stack described by `config`: networking, the cluster and its IAM roles, the OIDC
/// provider and VPC CNI add-on, and a managed node group launched from a launch template. The
/// cluster's name is exported as `cluster_name`.
pub fn declare(config: &StackConfig) -> Result<Stack> {
    config.validate().context(error::ConfigSnafu)?;
    let names = &config.names;
    let mut stack = Stack::new(config.provider_context());
    debug!("Declaring stack in region '{}'", config.region);

    let vpc = stack
        .register::<Vpc>(
            &names.vpc,
            Output::known(VpcArgs {
                cidr_block: config.network.cidr_block.clone(),
                availability_zone_count: config.network.availability_zones,
                tags: Default::default(),
            }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.vpc,
        })?;

    let cluster_role = stack
        .register::<Role>(
            &names.cluster_role,
            Output::known(RoleArgs {
                role_name: Some(names.cluster_role_name.clone()),
                assume_role_policy_document: PolicyDocument::service(EKS_SERVICE),
                managed_policy_arns: policies(CLUSTER_POLICIES),
            }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.cluster_role,
        })?;

    let subnet_ids = vpc
        .private_subnet_ids()
        .zip(vpc.public_subnet_ids())
        .map(|(private, public)| cluster_subnets(private, public));
    let cluster_config = config.cluster.clone();
    let cluster = stack
        .register::<Cluster>(
            &names.cluster,
            cluster_role
                .arn()
                .zip(subnet_ids)
                .map(move |(role_arn, subnet_ids)| ClusterArgs {
                    name: None,
                    role_arn,
                    version: cluster_config.version.clone(),
                    resources_vpc_config: ResourcesVpcConfig {
                        subnet_ids,
                        endpoint_public_access: cluster_config.endpoint_public_access,
                        endpoint_private_access: cluster_config.endpoint_private_access,
                    },
                }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.cluster,
        })?;

    let oidc_provider = stack
        .register::<OidcProvider>(
            &names.oidc_provider,
            cluster
                .open_id_connect_issuer_url()
                .map(|url| OidcProviderArgs {
                    url,
                    client_id_list: vec![STS_AUDIENCE.to_string()],
                    thumbprint_list: vec![EKS_OIDC_THUMBPRINT.to_string()],
                }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.oidc_provider,
        })?;

    let cni_role = stack
        .register::<Role>(
            &names.cni_role,
            oidc_provider.arn().try_map(|oidc_arn| {
                PolicyDocument::web_identity(&oidc_arn).map(|document| RoleArgs {
                    role_name: None,
                    assume_role_policy_document: document,
                    managed_policy_arns: policies(CNI_POLICIES),
                })
            }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.cni_role,
        })?;

    stack
        .register::<Addon>(
            &names.cni_addon,
            cluster
                .cluster_name()
                .zip(cni_role.arn())
                .map(|(cluster_name, role_arn)| AddonArgs {
                    cluster_name,
                    addon_name: VPC_CNI_ADDON.to_string(),
                    addon_version: None,
                    service_account_role_arn: Some(role_arn),
                }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.cni_addon,
        })?;

    let node_role = stack
        .register::<Role>(
            &names.node_role,
            Output::known(RoleArgs {
                role_name: None,
                assume_role_policy_document: PolicyDocument::service(EC2_SERVICE),
                managed_policy_arns: policies(NODE_POLICIES),
            }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.node_role,
        })?;

    let nodes = config.nodes.clone();
    let launch_template = stack
        .register::<LaunchTemplate>(
            &names.launch_template,
            cluster
                .cluster_name()
                .zip(cluster.cluster_security_group_id())
                .map(move |(cluster_name, security_group_id)| LaunchTemplateArgs {
                    launch_template_name: None,
                    launch_template_data: LaunchTemplateData {
                        instance_type: nodes.instance_type.clone(),
                        image_id: nodes.image_id.clone(),
                        user_data: Some(userdata::encode(&cluster_name)),
                        security_group_ids: vec![security_group_id],
                        block_device_mappings: vec![BlockDeviceMapping {
                            device_name: nodes.root_volume.device_name.clone(),
                            ebs: Some(Ebs {
                                volume_type: nodes.root_volume.volume_type.clone(),
                                volume_size: nodes.root_volume.volume_size,
                                iops: Some(nodes.root_volume.iops),
                                throughput: Some(nodes.root_volume.throughput),
                            }),
                        }],
                    },
                }),
            ResourceOptions::new(),
        )
        .context(error::DeclareSnafu {
            resource: &names.launch_template,
        })?;

    let mut nodegroup_options = ResourceOptions::new();
    if config.nodes.replacement == NodeReplacementPolicy::ReplaceOnTemplateVersionChange {
        nodegroup_options = nodegroup_options.replace_on_changes("/launchTemplate/version");
    }
    let capacity_type = config.nodes.capacity_type.clone();
    let scaling = ScalingConfig::from(config.nodes.scaling);
    let template = launch_template
        .launch_template_name()
        .zip(launch_template.latest_version_number())
        .map(|(name, version)| LaunchTemplateSpecification { name, version });
    stack
        .register::<Nodegroup>(
            &names.nodegroup,
            cluster
                .cluster_name()
                .zip(node_role.arn())
                .zip(template.zip(vpc.private_subnet_ids()))
                .map(
                    move |((cluster_name, node_role), (launch_template, subnets))| NodegroupArgs {
                        nodegroup_name: None,
                        cluster_name,
                        capacity_type: capacity_type.clone(),
                        node_role,
                        launch_template,
                        subnets,
                        scaling_config: scaling,
                    },
                ),
            nodegroup_options,
        )
        .context(error::DeclareSnafu {
            resource: &names.nodegroup,
        })?;

    stack.export(CLUSTER_NAME_OUTPUT, cluster.cluster_name());
    stack.validate().context(error::DeclareSnafu {
        resource: "stack",
    })?;
    Ok(stack)
}
