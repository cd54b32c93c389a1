use crate::error::{self, Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const TEMPLATE_PATTERN_REGEX: &str = r"^\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)\}$";
const PLAIN_PATTERN_REGEX: &str = r"^([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)$";

lazy_static::lazy_static! {
    static ref TEMPLATE_REGEX: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new(TEMPLATE_PATTERN_REGEX).unwrap()
    };
    static ref PLAIN_REGEX: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new(PLAIN_PATTERN_REGEX).unwrap()
    };
}

/// A reference to one attribute of one resource. It is written `${resource_name.field_name}` when
/// displayed, and either that form or the bare `resource_name.field_name` form can be parsed.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldRef {
    pub resource: String,
    pub field: String,
}

impl FieldRef {
    pub fn new<S1, S2>(resource: S1, field: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            resource: resource.into(),
            field: field.into(),
        }
    }
}

impl FromStr for FieldRef {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let captures = TEMPLATE_REGEX
            .captures(input)
            .or_else(|| PLAIN_REGEX.captures(input))
            .context(error::InvalidFieldRefSnafu { input })?;
        let resource = captures
            .get(1)
            .context(error::InvalidFieldRefSnafu { input })?
            .as_str();
        let field = captures
            .get(2)
            .context(error::InvalidFieldRefSnafu { input })?
            .as_str();
        Ok(Self::new(resource, field))
    }
}

impl TryFrom<String> for FieldRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_str(&value)
    }
}

impl From<FieldRef> for String {
    fn from(field_ref: FieldRef) -> Self {
        field_ref.to_string()
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.field)
    }
}

#[test]
fn test_pattern() {
    let field_ref = FieldRef::from_str(r"${eks-1747.issuerUrl}").unwrap();
    assert_eq!(field_ref.resource, "eks-1747");
    assert_eq!(field_ref.field, "issuerUrl");
    assert_eq!(
        FieldRef::from_str("nodes-role.arn").unwrap(),
        FieldRef::new("nodes-role", "arn")
    );
    assert!(FieldRef::from_str(r"hello").is_err());
    assert!(FieldRef::from_str(r"${hello}").is_err());
    assert!(FieldRef::from_str(r"foo${x.y}").is_err());
    assert!(FieldRef::from_str(r"${x.y}foo").is_err());
    assert!(FieldRef::from_str(r"${.x}").is_err());
    assert!(FieldRef::from_str(r"${x.}").is_err());
    assert!(FieldRef::from_str(r"${.}").is_err());
}

#[test]
fn test_display_round_trip() {
    let field_ref = FieldRef::new("cluster-launch-template", "latestVersionNumber");
    assert_eq!(
        field_ref.to_string(),
        "${cluster-launch-template.latestVersionNumber}"
    );
    assert_eq!(FieldRef::from_str(&field_ref.to_string()).unwrap(), field_ref);
}
