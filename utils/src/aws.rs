use crate::constants::{DEFAULT_ASSUME_ROLE_SESSION_DURATION, MAX_ATTEMPTS, SESSION_NAME};
use aws_config::default_provider::credentials::default_provider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::sts::AssumeRoleProvider;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_smithy_types::retry::{RetryConfig, RetryMode};
use aws_types::region::Region;
use aws_types::SdkConfig;
use log::debug;
use stack_model::ProviderContext;
use std::time::Duration;

/// Build the SDK configuration for every call made on behalf of `context`. Credentials come from
/// the named profile when one is given, otherwise from the default provider chain, and are
/// exchanged for the assumed role's credentials when a role is given.
pub async fn aws_config(context: &ProviderContext) -> SdkConfig {
    let region = Region::new(context.region.clone());
    debug!("Using region '{}' for all AWS calls", context.region);

    let base_provider = match &context.profile {
        Some(profile) => {
            debug!("Loading credentials from profile '{}'", profile);
            SharedCredentialsProvider::new(
                ProfileFileCredentialsProvider::builder()
                    .profile_name(profile)
                    .build(),
            )
        }
        None => SharedCredentialsProvider::new(default_provider().await),
    };

    let credentials_provider = match &context.assume_role {
        Some(role_arn) => {
            debug!("Assuming role '{}'", role_arn);
            SharedCredentialsProvider::new(
                AssumeRoleProvider::builder(role_arn)
                    .region(region.clone())
                    .session_name(SESSION_NAME)
                    .session_length(Duration::from_secs(DEFAULT_ASSUME_ROLE_SESSION_DURATION))
                    .build(base_provider),
            )
        }
        None => base_provider,
    };

    aws_config::from_env()
        .retry_config(
            RetryConfig::standard()
                .with_retry_mode(RetryMode::Adaptive)
                .with_max_attempts(MAX_ATTEMPTS),
        )
        .credentials_provider(credentials_provider)
        .region(region)
        .load()
        .await
}
