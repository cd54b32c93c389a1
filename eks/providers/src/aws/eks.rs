use super::{error_code, generate_name, is_not_found, AwsClients, LOGICAL_NAME_TAG};
use crate::wait::{poll, ADDON_TIMEOUT, CLUSTER_TIMEOUT, NODEGROUP_TIMEOUT};
use aws_sdk_eks::model as eks;
use eks_stack_types::kinds::{
    Addon, AddonArgs, AddonAttributes, Cluster, ClusterArgs, ClusterAttributes,
    LaunchTemplateSpecification, Nodegroup, NodegroupArgs, NodegroupAttributes, ScalingConfig,
};
use log::{info, trace, warn};
use resource_provider::{
    Create, Destroy, IntoProviderError, Previous, ProviderError, ProviderResult, Request,
    Resources, Teardown, Update,
};
use std::time::Duration;

/// Creates EKS control planes and applies version and endpoint changes in place.
pub struct ClusterProvider;

#[async_trait::async_trait]
impl Create for ClusterProvider {
    type Kind = Cluster;

    async fn create(&self, request: Request<'_, Cluster>) -> ProviderResult<ClusterAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args: ClusterArgs = request.args;
        let name = args
            .name
            .clone()
            .unwrap_or_else(|| generate_name(request.name));

        info!("Creating EKS cluster '{}' ({})", name, args.version);
        clients
            .eks
            .create_cluster()
            .name(&name)
            .role_arn(&args.role_arn)
            .version(&args.version)
            .resources_vpc_config(vpc_config(&args))
            .tags(LOGICAL_NAME_TAG, request.name)
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to create EKS cluster '{}'", name),
            )?;

        info!("Waiting for cluster '{}' to become active", name);
        let cluster = wait_for_cluster(&clients, &name, CLUSTER_TIMEOUT).await?;
        cluster_attributes(cluster)
    }
}

#[async_trait::async_trait]
impl Update for ClusterProvider {
    async fn update(
        &self,
        request: Request<'_, Cluster>,
        previous: Previous<Cluster>,
    ) -> ProviderResult<ClusterAttributes> {
        let clients = AwsClients::new(request.context).await;
        let name = previous.attributes.name.as_str();
        let args = request.args;

        let old_vpc = &previous.args.resources_vpc_config;
        let new_vpc = &args.resources_vpc_config;
        if old_vpc.endpoint_public_access != new_vpc.endpoint_public_access
            || old_vpc.endpoint_private_access != new_vpc.endpoint_private_access
        {
            info!("Updating the endpoint access of cluster '{}'", name);
            let update = clients
                .eks
                .update_cluster_config()
                .name(name)
                .resources_vpc_config(
                    eks::VpcConfigRequest::builder()
                        .endpoint_public_access(new_vpc.endpoint_public_access)
                        .endpoint_private_access(new_vpc.endpoint_private_access)
                        .build(),
                )
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to update the endpoints of cluster '{}'", name),
                )?
                .update;
            wait_for_update(&clients, name, None, None, update, CLUSTER_TIMEOUT).await?;
        }

        if args.version != previous.args.version {
            info!(
                "Updating cluster '{}' from {} to {}",
                name, previous.args.version, args.version
            );
            let update = clients
                .eks
                .update_cluster_version()
                .name(name)
                .version(&args.version)
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to update the version of cluster '{}'", name),
                )?
                .update;
            wait_for_update(&clients, name, None, None, update, CLUSTER_TIMEOUT).await?;
        }

        let cluster = wait_for_cluster(&clients, name, CLUSTER_TIMEOUT).await?;
        cluster_attributes(cluster)
    }
}

#[async_trait::async_trait]
impl Destroy for ClusterProvider {
    async fn destroy(&self, teardown: Teardown<'_, Cluster>) -> ProviderResult<()> {
        let clients = AwsClients::new(teardown.context).await;
        let name = match recorded_cluster_name(&clients, &teardown).await? {
            Some(name) => name,
            None => {
                warn!(
                    "No cluster was recorded or found for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };

        info!("Deleting EKS cluster '{}'", name);
        let result = clients.eks.delete_cluster().name(&name).send().await;
        if is_not_found(&result) {
            return Ok(());
        }
        result.context(
            Resources::Remaining,
            format!("Unable to delete EKS cluster '{}'", name),
        )?;
        let clients = &clients;
        let name = name.as_str();
        poll(
            &format!("cluster '{}' to be deleted", name),
            CLUSTER_TIMEOUT,
            Resources::Remaining,
            move || async move {
                let result = clients.eks.describe_cluster().name(name).send().await;
                if is_not_found(&result) {
                    return Ok(Some(()));
                }
                result.context(
                    Resources::Remaining,
                    format!("Unable to describe cluster '{}'", name),
                )?;
                Ok(None)
            },
        )
        .await
    }
}

fn vpc_config(args: &ClusterArgs) -> eks::VpcConfigRequest {
    let vpc = &args.resources_vpc_config;
    eks::VpcConfigRequest::builder()
        .set_subnet_ids(Some(vpc.subnet_ids.clone()))
        .endpoint_public_access(vpc.endpoint_public_access)
        .endpoint_private_access(vpc.endpoint_private_access)
        .build()
}

/// The physical name from the recorded attributes, the arguments, or failing both, by looking for
/// a cluster tagged with the logical name.
async fn recorded_cluster_name(
    clients: &AwsClients,
    teardown: &Teardown<'_, Cluster>,
) -> ProviderResult<Option<String>> {
    if let Some(attributes) = &teardown.attributes {
        if !attributes.name.is_empty() {
            return Ok(Some(attributes.name.clone()));
        }
    }
    if let Some(name) = teardown.args.as_ref().and_then(|args| args.name.clone()) {
        return Ok(Some(name));
    }

    let mut next_token = None;
    loop {
        let page = clients
            .eks
            .list_clusters()
            .set_next_token(next_token)
            .send()
            .await
            .context(Resources::Unknown, "Unable to list EKS clusters")?;
        for name in page.clusters.unwrap_or_default() {
            let cluster = clients
                .eks
                .describe_cluster()
                .name(&name)
                .send()
                .await
                .context(
                    Resources::Unknown,
                    format!("Unable to describe cluster '{}'", name),
                )?
                .cluster;
            let tagged = cluster
                .and_then(|cluster| cluster.tags)
                .and_then(|tags| tags.get(LOGICAL_NAME_TAG).cloned());
            if tagged.as_deref() == Some(teardown.name) {
                return Ok(Some(name));
            }
        }
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => return Ok(None),
        }
    }
}

async fn wait_for_cluster(
    clients: &AwsClients,
    name: &str,
    limit: Duration,
) -> ProviderResult<eks::Cluster> {
    poll(
        &format!("cluster '{}' to become active", name),
        limit,
        Resources::Remaining,
        move || async move {
            let cluster = clients
                .eks
                .describe_cluster()
                .name(name)
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to describe cluster '{}'", name),
                )?
                .cluster
                .context(
                    Resources::Remaining,
                    format!("Cluster '{}' was not described", name),
                )?;
            match &cluster.status {
                Some(eks::ClusterStatus::Active) => Ok(Some(cluster)),
                Some(eks::ClusterStatus::Failed) => Err(ProviderError::new_with_context(
                    Resources::Remaining,
                    format!("Cluster '{}' failed to become active", name),
                )),
                status => {
                    trace!("Cluster '{}' is {:?}", name, status);
                    Ok(None)
                }
            }
        },
    )
    .await
}

fn cluster_attributes(cluster: eks::Cluster) -> ProviderResult<ClusterAttributes> {
    let name = cluster
        .name
        .context(Resources::Remaining, "The cluster has no name")?;
    Ok(ClusterAttributes {
        arn: cluster.arn.unwrap_or_default(),
        endpoint: cluster.endpoint.unwrap_or_default(),
        certificate_authority_data: cluster
            .certificate_authority
            .and_then(|authority| authority.data)
            .unwrap_or_default(),
        open_id_connect_issuer_url: cluster
            .identity
            .and_then(|identity| identity.oidc)
            .and_then(|oidc| oidc.issuer)
            .context(
                Resources::Remaining,
                format!("Cluster '{}' has no OIDC issuer", name),
            )?,
        cluster_security_group_id: cluster
            .resources_vpc_config
            .and_then(|vpc| vpc.cluster_security_group_id)
            .context(
                Resources::Remaining,
                format!("Cluster '{}' has no cluster security group", name),
            )?,
        version: cluster.version.unwrap_or_default(),
        name,
    })
}

/// Wait for an EKS update, of a cluster, node group or add-on, to finish successfully.
async fn wait_for_update(
    clients: &AwsClients,
    cluster_name: &str,
    nodegroup_name: Option<&str>,
    addon_name: Option<&str>,
    update: Option<eks::Update>,
    limit: Duration,
) -> ProviderResult<()> {
    let update_id = match update.and_then(|update| update.id) {
        Some(id) => id,
        None => return Ok(()),
    };
    let update_id = update_id.as_str();
    poll(
        &format!("update '{}' of '{}'", update_id, cluster_name),
        limit,
        Resources::Remaining,
        move || async move {
            let update = clients
                .eks
                .describe_update()
                .name(cluster_name)
                .update_id(update_id)
                .set_nodegroup_name(nodegroup_name.map(str::to_string))
                .set_addon_name(addon_name.map(str::to_string))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to describe update '{}'", update_id),
                )?
                .update
                .context(
                    Resources::Remaining,
                    format!("Update '{}' was not described", update_id),
                )?;
            match &update.status {
                Some(eks::UpdateStatus::Successful) => Ok(Some(())),
                Some(eks::UpdateStatus::Failed) | Some(eks::UpdateStatus::Cancelled) => {
                    let errors: Vec<String> = update
                        .errors
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|error| error.error_message)
                        .collect();
                    Err(ProviderError::new_with_context(
                        Resources::Remaining,
                        format!("Update '{}' failed: {}", update_id, errors.join("; ")),
                    ))
                }
                _ => Ok(None),
            }
        },
    )
    .await
}

/// Installs managed add-ons.
pub struct AddonProvider;

#[async_trait::async_trait]
impl Create for AddonProvider {
    type Kind = Addon;

    async fn create(&self, request: Request<'_, Addon>) -> ProviderResult<AddonAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args: AddonArgs = request.args;
        info!(
            "Installing add-on '{}' in cluster '{}'",
            args.addon_name, args.cluster_name
        );
        clients
            .eks
            .create_addon()
            .cluster_name(&args.cluster_name)
            .addon_name(&args.addon_name)
            .set_addon_version(args.addon_version.clone())
            .set_service_account_role_arn(args.service_account_role_arn.clone())
            .resolve_conflicts(eks::ResolveConflicts::Overwrite)
            .tags(LOGICAL_NAME_TAG, request.name)
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to install add-on '{}'", args.addon_name),
            )?;
        wait_for_addon(&clients, &args).await
    }
}

#[async_trait::async_trait]
impl Update for AddonProvider {
    async fn update(
        &self,
        request: Request<'_, Addon>,
        _previous: Previous<Addon>,
    ) -> ProviderResult<AddonAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args = request.args;
        info!(
            "Updating add-on '{}' in cluster '{}'",
            args.addon_name, args.cluster_name
        );
        let update = clients
            .eks
            .update_addon()
            .cluster_name(&args.cluster_name)
            .addon_name(&args.addon_name)
            .set_addon_version(args.addon_version.clone())
            .set_service_account_role_arn(args.service_account_role_arn.clone())
            .resolve_conflicts(eks::ResolveConflicts::Overwrite)
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to update add-on '{}'", args.addon_name),
            )?
            .update;
        wait_for_update(
            &clients,
            &args.cluster_name,
            None,
            Some(&args.addon_name),
            update,
            ADDON_TIMEOUT,
        )
        .await?;
        wait_for_addon(&clients, &args).await
    }
}

#[async_trait::async_trait]
impl Destroy for AddonProvider {
    async fn destroy(&self, teardown: Teardown<'_, Addon>) -> ProviderResult<()> {
        let args = match teardown.args {
            Some(args) => args,
            None => {
                warn!(
                    "No arguments were recorded for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };
        let clients = AwsClients::new(teardown.context).await;
        info!(
            "Removing add-on '{}' from cluster '{}'",
            args.addon_name, args.cluster_name
        );
        let result = clients
            .eks
            .delete_addon()
            .cluster_name(&args.cluster_name)
            .addon_name(&args.addon_name)
            .send()
            .await;
        if is_not_found(&result) {
            return Ok(());
        }
        result.context(
            Resources::Remaining,
            format!("Unable to remove add-on '{}'", args.addon_name),
        )?;
        let clients = &clients;
        let args = &args;
        poll(
            &format!("add-on '{}' to be removed", args.addon_name),
            ADDON_TIMEOUT,
            Resources::Remaining,
            move || async move {
                let result = clients
                    .eks
                    .describe_addon()
                    .cluster_name(&args.cluster_name)
                    .addon_name(&args.addon_name)
                    .send()
                    .await;
                if is_not_found(&result) {
                    return Ok(Some(()));
                }
                result.context(
                    Resources::Remaining,
                    format!("Unable to describe add-on '{}'", args.addon_name),
                )?;
                Ok(None)
            },
        )
        .await
    }
}

async fn wait_for_addon(clients: &AwsClients, args: &AddonArgs) -> ProviderResult<AddonAttributes> {
    poll(
        &format!("add-on '{}' to become active", args.addon_name),
        ADDON_TIMEOUT,
        Resources::Remaining,
        move || async move {
            let addon = clients
                .eks
                .describe_addon()
                .cluster_name(&args.cluster_name)
                .addon_name(&args.addon_name)
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to describe add-on '{}'", args.addon_name),
                )?
                .addon
                .context(
                    Resources::Remaining,
                    format!("Add-on '{}' was not described", args.addon_name),
                )?;
            match &addon.status {
                Some(eks::AddonStatus::Active) => Ok(Some(AddonAttributes {
                    arn: addon.addon_arn.clone().unwrap_or_default(),
                    addon_version: addon.addon_version.clone().unwrap_or_default(),
                })),
                Some(eks::AddonStatus::CreateFailed) | Some(eks::AddonStatus::UpdateFailed) => {
                    Err(ProviderError::new_with_context(
                        Resources::Remaining,
                        format!("Add-on '{}' is {:?}", args.addon_name, addon.status),
                    ))
                }
                status => {
                    trace!("Add-on '{}' is {:?}", args.addon_name, status);
                    Ok(None)
                }
            }
        },
    )
    .await
}

/// Creates managed node groups and rolls them to new launch template versions.
pub struct NodegroupProvider;

#[async_trait::async_trait]
impl Create for NodegroupProvider {
    type Kind = Nodegroup;

    async fn create(
        &self,
        request: Request<'_, Nodegroup>,
    ) -> ProviderResult<NodegroupAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args: NodegroupArgs = request.args;
        let name = args
            .nodegroup_name
            .clone()
            .unwrap_or_else(|| generate_name(request.name));

        info!(
            "Creating node group '{}' in cluster '{}' from '{}' version {}",
            name, args.cluster_name, args.launch_template.name, args.launch_template.version
        );
        clients
            .eks
            .create_nodegroup()
            .cluster_name(&args.cluster_name)
            .nodegroup_name(&name)
            .capacity_type(eks::CapacityTypes::from(args.capacity_type.as_str()))
            .node_role(&args.node_role)
            .set_subnets(Some(args.subnets.clone()))
            .scaling_config(scaling_config(&args.scaling_config))
            .launch_template(launch_template(&args.launch_template))
            .tags(LOGICAL_NAME_TAG, request.name)
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to create node group '{}'", name),
            )?;
        wait_for_nodegroup(&clients, &args.cluster_name, &name).await
    }
}

#[async_trait::async_trait]
impl Update for NodegroupProvider {
    async fn update(
        &self,
        request: Request<'_, Nodegroup>,
        previous: Previous<Nodegroup>,
    ) -> ProviderResult<NodegroupAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args = request.args;
        let name = previous.attributes.nodegroup_name.as_str();

        if args.scaling_config != previous.args.scaling_config {
            info!("Updating the scaling of node group '{}'", name);
            let update = clients
                .eks
                .update_nodegroup_config()
                .cluster_name(&args.cluster_name)
                .nodegroup_name(name)
                .scaling_config(scaling_config(&args.scaling_config))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to update the scaling of node group '{}'", name),
                )?
                .update;
            wait_for_update(
                &clients,
                &args.cluster_name,
                Some(name),
                None,
                update,
                NODEGROUP_TIMEOUT,
            )
            .await?;
        }

        if args.launch_template != previous.args.launch_template {
            info!(
                "Rolling node group '{}' to '{}' version {}",
                name, args.launch_template.name, args.launch_template.version
            );
            let update = clients
                .eks
                .update_nodegroup_version()
                .cluster_name(&args.cluster_name)
                .nodegroup_name(name)
                .launch_template(launch_template(&args.launch_template))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to update the version of node group '{}'", name),
                )?
                .update;
            wait_for_update(
                &clients,
                &args.cluster_name,
                Some(name),
                None,
                update,
                NODEGROUP_TIMEOUT,
            )
            .await?;
        }

        wait_for_nodegroup(&clients, &args.cluster_name, name).await
    }
}

#[async_trait::async_trait]
impl Destroy for NodegroupProvider {
    async fn destroy(&self, teardown: Teardown<'_, Nodegroup>) -> ProviderResult<()> {
        let cluster_name = match &teardown.args {
            Some(args) => args.cluster_name.clone(),
            None => {
                warn!(
                    "No cluster was recorded for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };
        let clients = AwsClients::new(teardown.context).await;
        let name = match &teardown.attributes {
            Some(attributes) if !attributes.nodegroup_name.is_empty() => {
                Some(attributes.nodegroup_name.clone())
            }
            _ => find_nodegroup(&clients, &cluster_name, teardown.name).await?,
        };
        let name = match name {
            Some(name) => name,
            None => {
                warn!(
                    "No node group was recorded or found for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };

        info!("Deleting node group '{}'", name);
        let result = clients
            .eks
            .delete_nodegroup()
            .cluster_name(&cluster_name)
            .nodegroup_name(&name)
            .send()
            .await;
        if is_not_found(&result) {
            return Ok(());
        }
        result.context(
            Resources::Remaining,
            format!("Unable to delete node group '{}'", name),
        )?;
        let clients = &clients;
        let cluster_name = cluster_name.as_str();
        let name = name.as_str();
        poll(
            &format!("node group '{}' to be deleted", name),
            NODEGROUP_TIMEOUT,
            Resources::Remaining,
            move || async move {
                let result = clients
                    .eks
                    .describe_nodegroup()
                    .cluster_name(cluster_name)
                    .nodegroup_name(name)
                    .send()
                    .await;
                if is_not_found(&result) {
                    return Ok(Some(()));
                }
                result.context(
                    Resources::Remaining,
                    format!("Unable to describe node group '{}'", name),
                )?;
                Ok(None)
            },
        )
        .await
    }
}

fn scaling_config(scaling: &ScalingConfig) -> eks::NodegroupScalingConfig {
    eks::NodegroupScalingConfig::builder()
        .desired_size(scaling.desired_size)
        .min_size(scaling.min_size)
        .max_size(scaling.max_size)
        .build()
}

fn launch_template(spec: &LaunchTemplateSpecification) -> eks::LaunchTemplateSpecification {
    eks::LaunchTemplateSpecification::builder()
        .name(&spec.name)
        .version(&spec.version)
        .build()
}

async fn find_nodegroup(
    clients: &AwsClients,
    cluster_name: &str,
    logical_name: &str,
) -> ProviderResult<Option<String>> {
    let listed = clients
        .eks
        .list_nodegroups()
        .cluster_name(cluster_name)
        .send()
        .await;
    if is_not_found(&listed) {
        return Ok(None);
    }
    let names = listed
        .context(
            Resources::Unknown,
            format!("Unable to list the node groups of '{}'", cluster_name),
        )?
        .nodegroups
        .unwrap_or_default();
    for name in names {
        let tags = clients
            .eks
            .describe_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(&name)
            .send()
            .await
            .context(
                Resources::Unknown,
                format!("Unable to describe node group '{}'", name),
            )?
            .nodegroup
            .and_then(|nodegroup| nodegroup.tags);
        if tags.and_then(|tags| tags.get(LOGICAL_NAME_TAG).cloned()).as_deref() == Some(logical_name)
        {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

async fn wait_for_nodegroup(
    clients: &AwsClients,
    cluster_name: &str,
    name: &str,
) -> ProviderResult<NodegroupAttributes> {
    poll(
        &format!("node group '{}' to become active", name),
        NODEGROUP_TIMEOUT,
        Resources::Remaining,
        move || async move {
            let result = clients
                .eks
                .describe_nodegroup()
                .cluster_name(cluster_name)
                .nodegroup_name(name)
                .send()
                .await;
            if let Err(e) = &result {
                if error_code(e) == Some("ResourceNotFoundException") {
                    trace!("Node group '{}' is not visible yet", name);
                    return Ok(None);
                }
            }
            let nodegroup = result
                .context(
                    Resources::Remaining,
                    format!("Unable to describe node group '{}'", name),
                )?
                .nodegroup
                .context(
                    Resources::Remaining,
                    format!("Node group '{}' was not described", name),
                )?;
            match &nodegroup.status {
                Some(eks::NodegroupStatus::Active) => Ok(Some(NodegroupAttributes {
                    nodegroup_name: name.to_string(),
                    arn: nodegroup.nodegroup_arn.clone().unwrap_or_default(),
                    launch_template_version: nodegroup
                        .launch_template
                        .as_ref()
                        .and_then(|template| template.version.clone())
                        .unwrap_or_default(),
                })),
                Some(eks::NodegroupStatus::CreateFailed) | Some(eks::NodegroupStatus::Degraded) => {
                    let issues: Vec<String> = nodegroup
                        .health
                        .as_ref()
                        .and_then(|health| health.issues.clone())
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|issue| issue.message)
                        .collect();
                    Err(ProviderError::new_with_context(
                        Resources::Remaining,
                        format!(
                            "Node group '{}' is {:?}: {}",
                            name,
                            nodegroup.status,
                            issues.join("; ")
                        ),
                    ))
                }
                status => {
                    trace!("Node group '{}' is {:?}", name, status);
                    Ok(None)
                }
            }
        },
    )
    .await
}
