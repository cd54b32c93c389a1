/*!

`stack-utils` holds the plumbing shared by the stack's binaries and providers: building the AWS SDK
configuration from a [`ProviderContext`](stack_model::ProviderContext), initializing the logger,
and displaying values as JSON.

!*/

use constants::DEFAULT_LEVEL_FILTER;
use env_logger::Builder;
use log::LevelFilter;
use serde::Serialize;
use std::env;

pub mod aws;
pub mod constants;

pub use aws::aws_config;

/// The crates of this workspace, which log at the requested level when `RUST_LOG` is not set.
const WORKSPACE_CRATES: &[&str] = &[
    "eks_stack",
    "eks_stack_providers",
    "eks_stack_types",
    "resource_provider",
    "stack_model",
    "stack_utils",
];

/// Extract the value of `RUST_LOG` if it exists, otherwise log this workspace's crates at
/// `log_level` (or `DEFAULT_LEVEL_FILTER`) and everything else, including the AWS SDK, at `Error`.
pub fn init_logger(bin_crate: &str, log_level: Option<LevelFilter>) {
    match env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            let log_level = log_level.unwrap_or(DEFAULT_LEVEL_FILTER);
            let mut builder = Builder::new();
            builder.filter_level(LevelFilter::Error);
            builder.filter(Some(bin_crate), log_level);
            for name in WORKSPACE_CRATES {
                builder.filter(Some(name), log_level);
            }
            builder.init();
        }
    }
}

/// Print a value using `serde_json` `to_string_pretty` for types that implement Serialize.
pub fn json_display<T: Serialize>(object: T) -> String {
    serde_json::to_string_pretty(&object).unwrap_or_else(|e| format!("Serialization failed: {}", e))
}

/// Implement `Display` using `serde_json` `to_string_pretty` for types that implement Serialize.
#[macro_export]
macro_rules! impl_display_as_json {
    ($i:ident) => {
        impl std::fmt::Display for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let s = serde_json::to_string_pretty(self)
                    .unwrap_or_else(|e| format!("Serialization failed: {}", e));
                std::fmt::Display::fmt(&s, f)
            }
        }
    };
}

#[cfg(test)]
mod test {
    use super::json_display;
    use serde::Serialize;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Endpoint {
        cluster_name: String,
    }

    crate::impl_display_as_json!(Endpoint);

    #[test]
    fn values_display_as_pretty_json() {
        let endpoint = Endpoint {
            cluster_name: "eks-1747-abc1234".to_string(),
        };
        let expected = "{\n  \"clusterName\": \"eks-1747-abc1234\"\n}";
        assert_eq!(json_display(&endpoint), expected);
        assert_eq!(endpoint.to_string(), expected);
    }

    #[tokio::test]
    async fn config_uses_the_context_region() {
        let mut context = stack_model::ProviderContext::new("eu-west-1");
        context.profile = Some("nonexistent-profile".to_string());
        let config = super::aws_config(&context).await;
        assert_eq!(config.region().map(|r| r.as_ref()), Some("eu-west-1"));
    }
}
