//! The resource kinds that make up the stack, one module per AWS service family.

mod ec2;
mod eks;
mod iam;
mod vpc;

pub use ec2::{
    BlockDeviceMapping, Ebs, LaunchTemplate, LaunchTemplateArgs, LaunchTemplateAttributes,
    LaunchTemplateData, LaunchTemplateOutputs,
};
pub use eks::{
    Addon, AddonArgs, AddonAttributes, AddonOutputs, Cluster, ClusterArgs, ClusterAttributes,
    ClusterOutputs, LaunchTemplateSpecification, Nodegroup, NodegroupArgs, NodegroupAttributes,
    NodegroupOutputs, ResourcesVpcConfig, ScalingConfig,
};
pub use iam::{
    OidcProvider, OidcProviderArgs, OidcProviderAttributes, OidcProviderOutputs, Role, RoleArgs,
    RoleAttributes, RoleOutputs, EKS_OIDC_THUMBPRINT,
};
pub use vpc::{Vpc, VpcArgs, VpcAttributes, VpcOutputs};

/// Length of the random suffix appended to auto-named resources.
pub const SUFFIX_LEN: usize = 7;

/// The physical name of an auto-named resource, `logical-name-suffix`.
pub fn physical_name(logical_name: &str, suffix: &str) -> String {
    format!("{}-{}", logical_name, suffix)
}

/// Check that `name` fits AWS's usual naming rules for `what`.
pub(crate) fn check_name(what: &str, name: &str, max_len: usize) -> Result<(), String> {
    if name.is_empty() || name.len() > max_len {
        return Err(format!(
            "{} '{}' must be between 1 and {} characters",
            what, name, max_len
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_+=,.@".contains(c))
    {
        return Err(format!("{} '{}' contains invalid characters", what, name));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{check_name, physical_name};

    #[test]
    fn names() {
        assert_eq!(physical_name("nodes-role", "1a2b3c4"), "nodes-role-1a2b3c4");
        assert!(check_name("role", "eks-role-1747", 64).is_ok());
        assert!(check_name("role", "", 64).is_err());
        assert!(check_name("role", "a b", 64).is_err());
        assert!(check_name("role", &"x".repeat(65), 64).is_err());
    }
}
