use serde::{Deserialize, Serialize};

/// The region every resource is placed in when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// The provider context is the explicit configuration handed to every resource declaration and to
/// every provider call. Nothing about the target account or region is read from ambient state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderContext {
    /// The region all resources are created in.
    pub region: String,

    /// A named profile to load credentials from instead of the default provider chain.
    #[serde(default)]
    pub profile: Option<String>,

    /// A role to assume before making any calls.
    #[serde(default)]
    pub assume_role: Option<String>,
}

impl ProviderContext {
    pub fn new<S: Into<String>>(region: S) -> Self {
        Self {
            region: region.into(),
            profile: None,
            assume_role: None,
        }
    }
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}
