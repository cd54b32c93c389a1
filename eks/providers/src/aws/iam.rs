use super::{generate_name, is_not_found, AwsClients};
use aws_sdk_iam::model::Tag;
use eks_stack_types::kinds::{
    OidcProvider, OidcProviderArgs, OidcProviderAttributes, Role, RoleArgs, RoleAttributes,
};
use log::{debug, info, warn};
use resource_provider::{
    Create, Destroy, IntoProviderError, Previous, ProviderError, ProviderResult, Request,
    Resources, Teardown, Update,
};
use std::collections::BTreeSet;

/// Creates IAM roles and keeps their trust policy and attached managed policies in sync.
pub struct RoleProvider;

#[async_trait::async_trait]
impl Create for RoleProvider {
    type Kind = Role;

    async fn create(&self, request: Request<'_, Role>) -> ProviderResult<RoleAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args = request.args;
        let role_name = args
            .role_name
            .clone()
            .unwrap_or_else(|| generate_name(request.name));
        let document = args
            .assume_role_policy_document
            .to_json()
            .context(Resources::Clear, "Unable to serialize trust policy")?;

        info!("Creating IAM role '{}'", role_name);
        let role = clients
            .iam
            .create_role()
            .role_name(&role_name)
            .assume_role_policy_document(document)
            .tags(
                Tag::builder()
                    .key(super::LOGICAL_NAME_TAG)
                    .value(request.name)
                    .build(),
            )
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to create IAM role '{}'", role_name),
            )?
            .role
            .context(Resources::Unknown, "The created role was not returned")?;
        let attributes = RoleAttributes {
            role_name: role_name.clone(),
            role_id: role.role_id.unwrap_or_default(),
            arn: role
                .arn
                .context(Resources::Remaining, "The created role has no ARN")?,
        };

        if let Err(e) = attach_policies(&clients, &role_name, &args.managed_policy_arns).await {
            warn!(
                "Unable to attach policies to '{}', removing the role: {}",
                role_name, e
            );
            return match delete_role(&clients, &role_name).await {
                Ok(()) => Err(e.with_resources(Resources::Clear)),
                Err(cleanup) => Err(ProviderError::new_with_source_and_context(
                    Resources::Orphaned,
                    format!(
                        "Unable to attach policies to '{}' ({}) and unable to remove it",
                        role_name,
                        e.message()
                    ),
                    cleanup,
                )),
            };
        }
        Ok(attributes)
    }
}

#[async_trait::async_trait]
impl Update for RoleProvider {
    async fn update(
        &self,
        request: Request<'_, Role>,
        previous: Previous<Role>,
    ) -> ProviderResult<RoleAttributes> {
        let clients = AwsClients::new(request.context).await;
        let role_name = previous.attributes.role_name.as_str();
        let args = request.args;

        if args.assume_role_policy_document != previous.args.assume_role_policy_document {
            info!("Updating the trust policy of '{}'", role_name);
            let document = args
                .assume_role_policy_document
                .to_json()
                .context(Resources::Remaining, "Unable to serialize trust policy")?;
            clients
                .iam
                .update_assume_role_policy()
                .role_name(role_name)
                .policy_document(document)
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to update the trust policy of '{}'", role_name),
                )?;
        }

        let attached = attached_policies(&clients, role_name).await?;
        let wanted: BTreeSet<String> = args.managed_policy_arns.iter().cloned().collect();
        let missing: Vec<String> = wanted.difference(&attached).cloned().collect();
        attach_policies(&clients, role_name, &missing).await?;
        for policy_arn in attached.difference(&wanted) {
            info!("Detaching '{}' from '{}'", policy_arn, role_name);
            clients
                .iam
                .detach_role_policy()
                .role_name(role_name)
                .policy_arn(policy_arn)
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to detach '{}' from '{}'", policy_arn, role_name),
                )?;
        }
        Ok(previous.attributes)
    }
}

#[async_trait::async_trait]
impl Destroy for RoleProvider {
    async fn destroy(&self, teardown: Teardown<'_, Role>) -> ProviderResult<()> {
        let role_name = match (&teardown.attributes, &teardown.args) {
            (Some(attributes), _) => attributes.role_name.clone(),
            (None, Some(RoleArgs {
                role_name: Some(role_name),
                ..
            })) => role_name.clone(),
            _ => {
                warn!(
                    "No role name was recorded for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };
        let clients = AwsClients::new(teardown.context).await;
        delete_role(&clients, &role_name).await
    }
}

async fn attach_policies(
    clients: &AwsClients,
    role_name: &str,
    policy_arns: &[String],
) -> ProviderResult<()> {
    for policy_arn in policy_arns {
        info!("Attaching '{}' to '{}'", policy_arn, role_name);
        clients
            .iam
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to attach '{}' to '{}'", policy_arn, role_name),
            )?;
    }
    Ok(())
}

async fn attached_policies(clients: &AwsClients, role_name: &str) -> ProviderResult<BTreeSet<String>> {
    let output = clients
        .iam
        .list_attached_role_policies()
        .role_name(role_name)
        .send()
        .await
        .context(
            Resources::Remaining,
            format!("Unable to list the policies attached to '{}'", role_name),
        )?;
    Ok(output
        .attached_policies
        .unwrap_or_default()
        .into_iter()
        .filter_map(|policy| policy.policy_arn)
        .collect())
}

/// Detach every managed policy and delete the role. A role that is already gone is not an error.
async fn delete_role(clients: &AwsClients, role_name: &str) -> ProviderResult<()> {
    let listed = clients
        .iam
        .list_attached_role_policies()
        .role_name(role_name)
        .send()
        .await;
    if is_not_found(&listed) {
        info!("IAM role '{}' does not exist", role_name);
        return Ok(());
    }
    let attached = listed
        .context(
            Resources::Remaining,
            format!("Unable to list the policies attached to '{}'", role_name),
        )?
        .attached_policies
        .unwrap_or_default();
    for policy_arn in attached.into_iter().filter_map(|policy| policy.policy_arn) {
        debug!("Detaching '{}' from '{}'", policy_arn, role_name);
        clients
            .iam
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(&policy_arn)
            .send()
            .await
            .context(
                Resources::Remaining,
                format!("Unable to detach '{}' from '{}'", policy_arn, role_name),
            )?;
    }

    info!("Deleting IAM role '{}'", role_name);
    let deleted = clients.iam.delete_role().role_name(role_name).send().await;
    if is_not_found(&deleted) {
        return Ok(());
    }
    deleted.context(
        Resources::Remaining,
        format!("Unable to delete IAM role '{}'", role_name),
    )?;
    Ok(())
}

/// Registers OIDC identity providers with IAM.
pub struct OidcProviderProvider;

#[async_trait::async_trait]
impl Create for OidcProviderProvider {
    type Kind = OidcProvider;

    async fn create(
        &self,
        request: Request<'_, OidcProvider>,
    ) -> ProviderResult<OidcProviderAttributes> {
        let clients = AwsClients::new(request.context).await;
        let args: OidcProviderArgs = request.args;
        info!("Registering OIDC provider for '{}'", args.url);
        let arn = clients
            .iam
            .create_open_id_connect_provider()
            .url(&args.url)
            .set_client_id_list(Some(args.client_id_list.clone()))
            .set_thumbprint_list(Some(args.thumbprint_list.clone()))
            .tags(
                Tag::builder()
                    .key(super::LOGICAL_NAME_TAG)
                    .value(request.name)
                    .build(),
            )
            .send()
            .await
            .context(
                Resources::Clear,
                format!("Unable to register OIDC provider '{}'", args.url),
            )?
            .open_id_connect_provider_arn
            .context(
                Resources::Unknown,
                "The registered OIDC provider has no ARN",
            )?;
        Ok(OidcProviderAttributes { arn })
    }
}

#[async_trait::async_trait]
impl Update for OidcProviderProvider {
    async fn update(
        &self,
        request: Request<'_, OidcProvider>,
        previous: Previous<OidcProvider>,
    ) -> ProviderResult<OidcProviderAttributes> {
        let clients = AwsClients::new(request.context).await;
        let arn = previous.attributes.arn.as_str();
        let args = request.args;

        let old: BTreeSet<&String> = previous.args.client_id_list.iter().collect();
        let new: BTreeSet<&String> = args.client_id_list.iter().collect();
        for client_id in new.difference(&old) {
            info!("Adding client id '{}' to '{}'", client_id, arn);
            clients
                .iam
                .add_client_id_to_open_id_connect_provider()
                .open_id_connect_provider_arn(arn)
                .client_id(client_id.as_str())
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to add client id '{}' to '{}'", client_id, arn),
                )?;
        }
        for client_id in old.difference(&new) {
            info!("Removing client id '{}' from '{}'", client_id, arn);
            clients
                .iam
                .remove_client_id_from_open_id_connect_provider()
                .open_id_connect_provider_arn(arn)
                .client_id(client_id.as_str())
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to remove client id '{}' from '{}'", client_id, arn),
                )?;
        }
        if args.thumbprint_list != previous.args.thumbprint_list {
            info!("Updating the thumbprints of '{}'", arn);
            clients
                .iam
                .update_open_id_connect_provider_thumbprint()
                .open_id_connect_provider_arn(arn)
                .set_thumbprint_list(Some(args.thumbprint_list.clone()))
                .send()
                .await
                .context(
                    Resources::Remaining,
                    format!("Unable to update the thumbprints of '{}'", arn),
                )?;
        }
        Ok(previous.attributes)
    }
}

#[async_trait::async_trait]
impl Destroy for OidcProviderProvider {
    async fn destroy(&self, teardown: Teardown<'_, OidcProvider>) -> ProviderResult<()> {
        let arn = match teardown.attributes {
            Some(attributes) => attributes.arn,
            None => {
                warn!(
                    "No ARN was recorded for '{}', there is nothing to delete",
                    teardown.name
                );
                return Ok(());
            }
        };
        let clients = AwsClients::new(teardown.context).await;
        info!("Deleting OIDC provider '{}'", arn);
        let result = clients
            .iam
            .delete_open_id_connect_provider()
            .open_id_connect_provider_arn(&arn)
            .send()
            .await;
        if is_not_found(&result) {
            return Ok(());
        }
        result.context(
            Resources::Remaining,
            format!("Unable to delete OIDC provider '{}'", arn),
        )?;
        Ok(())
    }
}
