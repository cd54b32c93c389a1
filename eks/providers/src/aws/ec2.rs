use super::{generate_name, is_not_found, AwsClients, LOGICAL_NAME_TAG};
use aws_sdk_ec2::model::{
    Filter, InstanceType, LaunchTemplateBlockDeviceMappingRequest,
    LaunchTemplateEbsBlockDeviceRequest, RequestLaunchTemplateData, ResourceType, Tag,
    TagSpecification, VolumeType,
};
use eks_stack_types::kinds::{
    LaunchTemplate, LaunchTemplateArgs, LaunchTemplateAttributes, LaunchTemplateData,
};
use log::{debug, info, warn};
use resource_provider::{
    Create, Destroy, IntoProviderError, Previous, ProviderResult, Request, Resources, Teardown,
    Update,
};

/// Creates launch templates. A change to the template data is published as a new version of the
/// same template, never as a new template.
pub struct LaunchTemplateProvider;

#[async_trait::async_trait]
impl Create for LaunchTemplateProvider {
    type Kind = LaunchTemplate;

    async fn create(
        &self,
        request: Request<'_, LaunchTemplate>,
    ) -> ProviderResult<LaunchTemplateAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args: LaunchTemplateArgs = request.args;
        let name = args
            .launch_template_name
            .clone()
            .unwrap_or_else(|| generate_name(request.name));

        info!(
            "Creating launch template '{}' with image '{}'",
            name, args.launch_template_data.image_id
        );
        let template = clients
            .ec2
            .create_launch_template()
            .launch_template_name(&name)
            .launch_template_data(template_data(&args.launch_template_data))
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::LaunchTemplate)
                    .tags(
                        Tag::builder()
                            .key(LOGICAL_NAME_TAG)
                            .value(request.name)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to create launch template '{}'", name),
            )?
            .launch_template
            .context(
                Resources::Unknown,
                format!("Launch template '{}' was not returned", name),
            )?;

        let version = |number: Option<i64>| number.unwrap_or(1).to_string();
        Ok(LaunchTemplateAttributes {
            launch_template_id: template
                .launch_template_id
                .context(Resources::Remaining, "The launch template has no id")?,
            launch_template_name: template.launch_template_name.unwrap_or(name),
            default_version_number: version(template.default_version_number),
            latest_version_number: version(template.latest_version_number),
        })
    }
}

#[async_trait::async_trait]
impl Update for LaunchTemplateProvider {
    async fn update(
        &self,
        request: Request<'_, LaunchTemplate>,
        previous: Previous<LaunchTemplate>,
    ) -> ProviderResult<LaunchTemplateAttributes> {
        let args = request.args;
        if args.launch_template_data == previous.args.launch_template_data {
            return Ok(previous.attributes);
        }
        let clients = AwsClients::new(request.context).await;
        let id = previous.attributes.launch_template_id.as_str();

        info!(
            "Adding a version to launch template '{}' with image '{}'",
            previous.attributes.launch_template_name, args.launch_template_data.image_id
        );
        debug!(
            "Previous launch template data: {:?}",
            previous.args.launch_template_data
        );
        let version = clients
            .ec2
            .create_launch_template_version()
            .launch_template_id(id)
            .launch_template_data(template_data(&args.launch_template_data))
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to add a version to launch template '{}'", id),
            )?
            .launch_template_version
            .and_then(|version| version.version_number)
            .context(
                Resources::Remaining,
                format!("The new version of '{}' has no number", id),
            )?;

        // Instances launched from the template without a version get the newest data too.
        clients
            .ec2
            .modify_launch_template()
            .launch_template_id(id)
            .default_version(version.to_string())
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to make version {} the default of '{}'", version, id),
            )?;

        Ok(LaunchTemplateAttributes {
            default_version_number: version.to_string(),
            latest_version_number: version.to_string(),
            ..previous.attributes
        })
    }
}

#[async_trait::async_trait]
impl Destroy for LaunchTemplateProvider {
    async fn destroy(&self, teardown: Teardown<'_, LaunchTemplate>) -> ProviderResult<()> {
        let clients = AwsClients::new(teardown.context).await;
        let id = match teardown.attributes {
            Some(attributes) if !attributes.launch_template_id.is_empty() => {
                Some(attributes.launch_template_id)
            }
            _ => find_template(&clients, teardown.name).await?,
        };
        let id = match id {
            Some(id) => id,
            None => {
                warn!(
                    "No launch template was recorded or found for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };

        info!("Deleting launch template '{}'", id);
        let result = clients
            .ec2
            .delete_launch_template()
            .launch_template_id(&id)
            .send()
            .await;
        if is_not_found(&result) {
            return Ok(());
        }
        result.context(
            Resources::Remaining,
            format!("Unable to delete launch template '{}'", id),
        )?;
        Ok(())
    }
}

fn template_data(data: &LaunchTemplateData) -> RequestLaunchTemplateData {
    let mut builder = RequestLaunchTemplateData::builder()
        .instance_type(InstanceType::from(data.instance_type.as_str()))
        .image_id(&data.image_id)
        .set_user_data(data.user_data.clone())
        .set_security_group_ids(Some(data.security_group_ids.clone()));
    for mapping in &data.block_device_mappings {
        let ebs = mapping.ebs.as_ref().map(|ebs| {
            LaunchTemplateEbsBlockDeviceRequest::builder()
                .volume_type(VolumeType::from(ebs.volume_type.as_str()))
                .volume_size(ebs.volume_size)
                .set_iops(ebs.iops)
                .set_throughput(ebs.throughput)
                .build()
        });
        builder = builder.block_device_mappings(
            LaunchTemplateBlockDeviceMappingRequest::builder()
                .device_name(&mapping.device_name)
                .set_ebs(ebs)
                .build(),
        );
    }
    builder.build()
}

async fn find_template(clients: &AwsClients, logical_name: &str) -> ProviderResult<Option<String>> {
    let templates = clients
        .ec2
        .describe_launch_templates()
        .filters(
            Filter::builder()
                .name(format!("tag:{}", LOGICAL_NAME_TAG))
                .values(logical_name)
                .build(),
        )
        .send()
        .await
        .context(
            Resources::Unknown,
            format!("Unable to look up the launch template of '{}'", logical_name),
        )?
        .launch_templates
        .unwrap_or_default();
    if templates.len() > 1 {
        warn!(
            "Found {} launch templates tagged '{}', deleting the first",
            templates.len(),
            logical_name
        );
    }
    Ok(templates
        .into_iter()
        .next()
        .and_then(|template| template.launch_template_id))
}
