/*!

AWS SDK implementations of the stack's resource kinds. Every call builds its clients from the
request's [`ProviderContext`], so one registry can serve stacks in different accounts or regions.

!*/

mod ec2;
mod eks;
mod iam;
mod vpc;

pub use ec2::LaunchTemplateProvider;
pub use eks::{AddonProvider, ClusterProvider, NodegroupProvider};
pub use iam::{OidcProviderProvider, RoleProvider};
pub use vpc::VpcProvider;

use aws_sdk_eks::types::SdkError;
use aws_smithy_types::retry::ProvideErrorKind;
use eks_stack_types::kinds::{physical_name, SUFFIX_LEN};
use stack_model::ProviderContext;
use stack_utils::aws_config;
use uuid::Uuid;

/// Tag carried by every taggable resource so that it can be found again when its identifiers were
/// never recorded.
pub(crate) const LOGICAL_NAME_TAG: &str = "eks-stack:logical-name";

#[derive(Clone, Debug)]
pub(crate) struct AwsClients {
    pub(crate) ec2: aws_sdk_ec2::Client,
    pub(crate) eks: aws_sdk_eks::Client,
    pub(crate) iam: aws_sdk_iam::Client,
}

impl AwsClients {
    pub(crate) async fn new(context: &ProviderContext) -> Self {
        let config = aws_config(context).await;
        Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            eks: aws_sdk_eks::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
        }
    }
}

/// A physical name for `logical_name` with a fresh random suffix.
pub(crate) fn generate_name(logical_name: &str) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect();
    physical_name(logical_name, &suffix)
}

/// The service error code of a failed call, e.g. `NoSuchEntity` or `ResourceNotFoundException`.
pub(crate) fn error_code<E, R>(error: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorKind,
{
    match error {
        SdkError::ServiceError(service_error) => service_error.err().code(),
        _ => None,
    }
}

/// Whether a call failed only because its target does not exist.
pub(crate) fn is_not_found<T, E, R>(result: &Result<T, SdkError<E, R>>) -> bool
where
    E: ProvideErrorKind,
{
    match result {
        Err(error) => matches!(
            error_code(error),
            Some(
                "NoSuchEntity"
                    | "ResourceNotFoundException"
                    | "InvalidLaunchTemplateId.NotFound"
                    | "InvalidLaunchTemplateName.NotFoundException"
                    | "InvalidVpcID.NotFound"
                    | "InvalidSubnetID.NotFound"
                    | "InvalidRouteTableID.NotFound"
                    | "InvalidInternetGatewayID.NotFound"
                    | "InvalidAllocationID.NotFound"
                    | "NatGatewayNotFound"
            )
        ),
        Ok(_) => false,
    }
}
