/*!

IAM trust policies. Every role in the stack is assumable by exactly one principal through exactly
one action, so the documents are modelled with that fixed shape rather than as free-form JSON.

!*/

use crate::arn::Arn;
use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ASSUME_ROLE: &str = "sts:AssumeRole";
pub const ASSUME_ROLE_WITH_WEB_IDENTITY: &str = "sts:AssumeRoleWithWebIdentity";
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";
pub const CNI_SERVICE_ACCOUNT: &str = "system:serviceaccount:kube-system:aws-node";

const OIDC_PROVIDER_PREFIX: &str = "oidc-provider/";

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    pub principal: Principal,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Principal {
    /// An AWS service such as `eks.amazonaws.com`.
    Service(String),
    /// A federated identity provider, given by its ARN.
    Federated(String),
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "StringEquals")]
    pub string_equals: BTreeMap<String, String>,
}

impl PolicyDocument {
    /// A trust policy that lets an AWS service assume the role.
    pub fn service(service: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: Effect::Allow,
                principal: Principal::Service(service.to_string()),
                action: ASSUME_ROLE.to_string(),
                condition: None,
            }],
        }
    }

    /// A trust policy that lets the cluster's `aws-node` service account assume the role through
    /// the cluster's OIDC provider.
    pub fn web_identity(oidc_provider_arn: &str) -> Result<Self> {
        let issuer = OidcProviderArn::from_str(oidc_provider_arn)?;
        let mut string_equals = BTreeMap::new();
        string_equals.insert(issuer.subject_key(), CNI_SERVICE_ACCOUNT.to_string());
        string_equals.insert(issuer.audience_key(), STS_AUDIENCE.to_string());
        Ok(Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: Effect::Allow,
                principal: Principal::Federated(oidc_provider_arn.to_string()),
                action: ASSUME_ROLE_WITH_WEB_IDENTITY.to_string(),
                condition: Some(Condition { string_equals }),
            }],
        })
    }

    /// The document as the JSON string IAM expects.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            error::InvalidConfigSnafu {
                message: format!("unable to serialize trust policy: {}", e),
            }
            .build()
        })
    }

    /// Reject documents that do not have the single-principal, single-action shape.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.version != POLICY_VERSION {
            return Err(format!(
                "trust policy version must be '{}', not '{}'",
                POLICY_VERSION, self.version
            ));
        }
        let statement = match self.statement.as_slice() {
            [statement] => statement,
            statements => {
                return Err(format!(
                    "trust policy must have exactly one statement, found {}",
                    statements.len()
                ))
            }
        };
        if statement.effect != Effect::Allow {
            return Err("trust policy statement must allow".to_string());
        }
        match &statement.principal {
            Principal::Service(service) => {
                if !service.ends_with(".amazonaws.com") {
                    return Err(format!("'{}' is not an AWS service principal", service));
                }
                if statement.action != ASSUME_ROLE {
                    return Err(format!(
                        "a service principal must use '{}', not '{}'",
                        ASSUME_ROLE, statement.action
                    ));
                }
            }
            Principal::Federated(arn) => {
                let issuer = OidcProviderArn::from_str(arn).map_err(|e| e.to_string())?;
                if statement.action != ASSUME_ROLE_WITH_WEB_IDENTITY {
                    return Err(format!(
                        "a federated principal must use '{}', not '{}'",
                        ASSUME_ROLE_WITH_WEB_IDENTITY, statement.action
                    ));
                }
                let condition = statement
                    .condition
                    .as_ref()
                    .ok_or_else(|| "a federated principal must be conditioned".to_string())?;
                for key in condition.string_equals.keys() {
                    if key != &issuer.subject_key() && key != &issuer.audience_key() {
                        return Err(format!(
                            "condition key '{}' does not belong to issuer '{}'",
                            key,
                            issuer.issuer()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// The ARN of an IAM OIDC identity provider,
/// `arn:aws:iam::ACCOUNT:oidc-provider/ISSUER_HOST/ISSUER_PATH`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OidcProviderArn {
    arn: Arn,
    issuer: String,
}

impl OidcProviderArn {
    /// The issuer host and path, e.g. `oidc.eks.us-east-1.amazonaws.com/id/ABC`.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn arn(&self) -> &Arn {
        &self.arn
    }

    pub fn subject_key(&self) -> String {
        format!("{}:sub", self.issuer)
    }

    pub fn audience_key(&self) -> String {
        format!("{}:aud", self.issuer)
    }
}

impl FromStr for OidcProviderArn {
    type Err = crate::Error;

    fn from_str(input: &str) -> Result<Self> {
        let arn = Arn::from_str(input)?;
        ensure!(
            arn.service == "iam",
            error::ArnSnafu {
                arn: input,
                reason: "an OIDC provider ARN belongs to the 'iam' service",
            }
        );
        let issuer = arn.resource.strip_prefix(OIDC_PROVIDER_PREFIX).ok_or_else(|| {
            error::ArnSnafu {
                arn: input,
                reason: format!("the resource must start with '{}'", OIDC_PROVIDER_PREFIX),
            }
            .build()
        })?;
        let url = Url::parse(&format!("https://{}", issuer))
            .context(error::IssuerUrlSnafu { input: issuer })?;
        let host = url.host_str().unwrap_or_default();
        ensure!(
            !host.is_empty(),
            error::ArnSnafu {
                arn: input,
                reason: "the issuer has no host",
            }
        );
        // The parser lowercases the host and resolves dot segments. IAM matches the condition keys
        // against the issuer text as registered, so anything it would rewrite is refused.
        let rebuilt = format!("{}{}", host, url.path().trim_end_matches('/'));
        ensure!(
            rebuilt == issuer && url.query().is_none() && url.fragment().is_none(),
            error::ArnSnafu {
                arn: input,
                reason: format!("the issuer '{}' is not in canonical form", issuer),
            }
        );
        Ok(Self {
            issuer: issuer.to_string(),
            arn,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{OidcProviderArn, PolicyDocument, Principal};
    use serde_json::json;
    use std::str::FromStr;

    const OIDC_ARN: &str = "arn:aws:iam::111122223333:oidc-provider/oidc.example.com/id/ABC";

    #[test]
    fn service_trust_has_the_expected_shape() {
        let document = PolicyDocument::service("eks.amazonaws.com");
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Service": "eks.amazonaws.com"},
                    "Action": "sts:AssumeRole"
                }]
            })
        );
        document.validate().unwrap();
    }

    #[test]
    fn web_identity_condition_keys_come_from_the_provider_arn() {
        let document = PolicyDocument::web_identity(OIDC_ARN).unwrap();
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Federated": OIDC_ARN},
                    "Action": "sts:AssumeRoleWithWebIdentity",
                    "Condition": {
                        "StringEquals": {
                            "oidc.example.com/id/ABC:aud": "sts.amazonaws.com",
                            "oidc.example.com/id/ABC:sub": "system:serviceaccount:kube-system:aws-node"
                        }
                    }
                }]
            })
        );
        document.validate().unwrap();
    }

    #[test]
    fn issuer_matches_the_text_after_the_first_slash() {
        for arn in [
            OIDC_ARN,
            "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/0123456789ABCDEF",
            "arn:aws-cn:iam::123456789012:oidc-provider/oidc.eks.cn-north-1.amazonaws.com.cn/id/X1",
        ] {
            let expected = arn.splitn(2, '/').nth(1).unwrap();
            assert_eq!(OidcProviderArn::from_str(arn).unwrap().issuer(), expected);
        }
    }

    #[test]
    fn issuers_that_would_be_rewritten_are_rejected() {
        for issuer in [
            "OIDC.example.com/id/ABC",
            "oidc.example.com/id/./ABC",
            "oidc.example.com/id/ABC/",
            "oidc.example.com:8443/id/ABC",
            "oidc.example.com/id/ABC?x=1",
            "user@oidc.example.com/id/ABC",
        ] {
            let arn = format!("arn:aws:iam::111122223333:oidc-provider/{}", issuer);
            assert!(OidcProviderArn::from_str(&arn).is_err(), "{}", issuer);
        }
    }

    #[test]
    fn non_oidc_arns_are_rejected() {
        assert!(OidcProviderArn::from_str("arn:aws:iam::1:role/eks-role-1747").is_err());
        assert!(OidcProviderArn::from_str("arn:aws:s3:::oidc-provider/x.com").is_err());
        assert!(OidcProviderArn::from_str("oidc.example.com/id/ABC").is_err());
        assert!(PolicyDocument::web_identity("not-an-arn").is_err());
    }

    #[test]
    fn malformed_documents_fail_validation() {
        let mut document = PolicyDocument::service("eks.amazonaws.com");
        document.statement[0].action = "sts:AssumeRoleWithWebIdentity".to_string();
        assert!(document.validate().is_err());

        let mut document = PolicyDocument::service("eks.amazonaws.com");
        document.statement.push(document.statement[0].clone());
        assert!(document.validate().is_err());

        let mut document = PolicyDocument::service("example.com");
        document.statement[0].principal = Principal::Service("example.com".to_string());
        assert!(document.validate().is_err());

        let mut document = PolicyDocument::web_identity(OIDC_ARN).unwrap();
        document.statement[0].condition = None;
        assert!(document.validate().is_err());

        let mut document = PolicyDocument::web_identity(OIDC_ARN).unwrap();
        if let Some(condition) = document.statement[0].condition.as_mut() {
            condition
                .string_equals
                .insert("other.example.com:sub".to_string(), "x".to_string());
        }
        assert!(document.validate().is_err());
    }
}
