use super::check_name;
use crate::arn::Arn;
use crate::trust::PolicyDocument;
use configuration_derive::Configuration;
use serde::{Deserialize, Serialize};
use stack_model::{Output, Resource, ResourceKind};
use std::str::FromStr;

/// The well-known thumbprint of the root CA behind every EKS OIDC issuer.
pub const EKS_OIDC_THUMBPRINT: &str = "9e99a48a9960b14926bb7f3b02e22da2b0ab7280";

/// An IAM role with a trust policy and a set of attached managed policies.
pub struct Role;

impl ResourceKind for Role {
    const TYPE: &'static str = "aws:iam:Role";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &["/roleName"];

    type Args = RoleArgs;
    type Attributes = RoleAttributes;

    fn validate(args: &RoleArgs) -> Result<(), String> {
        if let Some(name) = &args.role_name {
            check_name("role name", name, 64)?;
        }
        args.assume_role_policy_document.validate()?;
        for policy in &args.managed_policy_arns {
            let arn = Arn::from_str(policy).map_err(|e| e.to_string())?;
            if arn.service != "iam" || !arn.resource.starts_with("policy/") {
                return Err(format!("'{}' is not a managed policy ARN", policy));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct RoleArgs {
    /// A fixed physical name. When absent the provider generates one from the logical name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    pub assume_role_policy_document: PolicyDocument,
    pub managed_policy_arns: Vec<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct RoleAttributes {
    pub role_name: String,
    pub role_id: String,
    pub arn: String,
}

pub trait RoleOutputs {
    fn arn(&self) -> Output<String>;
    fn role_name(&self) -> Output<String>;
}

impl RoleOutputs for Resource<Role> {
    fn arn(&self) -> Output<String> {
        self.attribute("arn")
    }

    fn role_name(&self) -> Output<String> {
        self.attribute("roleName")
    }
}

/// An IAM OpenID Connect identity provider.
pub struct OidcProvider;

impl ResourceKind for OidcProvider {
    const TYPE: &'static str = "aws:iam:OidcProvider";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &["/url"];

    type Args = OidcProviderArgs;
    type Attributes = OidcProviderAttributes;

    fn validate(args: &OidcProviderArgs) -> Result<(), String> {
        if !args.url.starts_with("https://") {
            return Err(format!("issuer URL '{}' must use https", args.url));
        }
        if args.client_id_list.is_empty() {
            return Err("an OIDC provider needs at least one client id".to_string());
        }
        for thumbprint in &args.thumbprint_list {
            if thumbprint.len() != 40 || !thumbprint.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("'{}' is not a SHA-1 thumbprint", thumbprint));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct OidcProviderArgs {
    pub url: String,
    pub client_id_list: Vec<String>,
    pub thumbprint_list: Vec<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct OidcProviderAttributes {
    pub arn: String,
}

pub trait OidcProviderOutputs {
    fn arn(&self) -> Output<String>;
}

impl OidcProviderOutputs for Resource<OidcProvider> {
    fn arn(&self) -> Output<String> {
        self.attribute("arn")
    }
}
