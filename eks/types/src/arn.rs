use crate::error::{self, Error, Result};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An Amazon Resource Name, `arn:partition:service:region:account-id:resource`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    /// Everything after the fifth colon. May itself contain colons and slashes.
    pub resource: String,
}

impl FromStr for Arn {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let mut parts = input.splitn(6, ':');
        let prefix = parts.next().unwrap_or_default();
        ensure!(
            prefix == "arn",
            error::ArnSnafu {
                arn: input,
                reason: "it does not start with 'arn:'",
            }
        );
        let mut next = |what: &str| {
            parts.next().map(str::to_string).context(error::ArnSnafu {
                arn: input,
                reason: format!("the {} is missing", what),
            })
        };
        let partition = next("partition")?;
        let service = next("service")?;
        let region = next("region")?;
        let account_id = next("account id")?;
        let resource = next("resource")?;
        ensure!(
            !partition.is_empty() && !service.is_empty() && !resource.is_empty(),
            error::ArnSnafu {
                arn: input,
                reason: "the partition, service and resource must not be empty",
            }
        );
        Ok(Self {
            partition,
            service,
            region,
            account_id,
            resource,
        })
    }
}

impl TryFrom<String> for Arn {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_str(&value)
    }
}

impl From<Arn> for String {
    fn from(arn: Arn) -> Self {
        arn.to_string()
    }
}

impl Display for Arn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

#[cfg(test)]
mod test {
    use super::Arn;
    use std::str::FromStr;

    #[test]
    fn parses_iam_arns() {
        let arn = Arn::from_str(
            "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC",
        )
        .unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(
            arn.resource,
            "oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC"
        );
        assert_eq!(
            arn.to_string(),
            "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC"
        );
    }

    #[test]
    fn resource_may_contain_colons() {
        let arn = Arn::from_str("arn:aws:logs:us-east-1:1:log-group:/aws/eks:*").unwrap();
        assert_eq!(arn.resource, "log-group:/aws/eks:*");
    }

    #[test]
    fn rejects_malformed_arns() {
        assert!(Arn::from_str("").is_err());
        assert!(Arn::from_str("nra:aws:iam::1:role/x").is_err());
        assert!(Arn::from_str("arn:aws:iam::1").is_err());
        assert!(Arn::from_str("arn:aws:iam::1:").is_err());
        assert!(Arn::from_str("arn::iam::1:role/x").is_err());
    }
}
