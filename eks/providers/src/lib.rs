/*!

The EKS stack itself. [`declare`] turns a [`StackConfig`](eks_stack_types::StackConfig) into the
resource graph, and [`aws_registry`] returns the providers that materialize that graph in an AWS
account through the AWS SDK.

!*/

pub mod aws;
mod error;
mod program;
mod wait;

pub use error::{Error, Result};
pub use program::{declare, CLUSTER_NAME_OUTPUT};

use resource_provider::ProviderRegistry;

/// Providers for every resource kind the stack declares.
pub fn aws_registry() -> ProviderRegistry {
    ProviderRegistry::new()
        .with(aws::VpcProvider)
        .with(aws::RoleProvider)
        .with(aws::OidcProviderProvider)
        .with(aws::ClusterProvider)
        .with(aws::AddonProvider)
        .with(aws::LaunchTemplateProvider)
        .with(aws::NodegroupProvider)
}
