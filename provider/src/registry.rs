use crate::provider::{
    Create, Destroy, IntoProviderError, Previous, ProviderResult, Request, Resources, Teardown,
    Update,
};
use log::warn;
use serde_json::{Map, Value};
use snafu::Snafu;
use stack_model::{Configuration, ProviderContext, ResourceKind, Stack};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RegistryError {
    #[snafu(display(
        "No provider is registered for resource kind '{}' (used by '{}')",
        kind,
        resource
    ))]
    MissingProvider { kind: String, resource: String },
}

/// The JSON-level face of a typed provider. Arguments and attributes are converted at this
/// boundary so that the engine can work with the recorded state directly.
#[async_trait::async_trait]
pub(crate) trait ErasedProvider: Send + Sync {
    async fn create(
        &self,
        context: &ProviderContext,
        name: &str,
        args: Value,
    ) -> ProviderResult<Map<String, Value>>;

    async fn update(
        &self,
        context: &ProviderContext,
        name: &str,
        args: Value,
        previous_args: Value,
        previous_attributes: Map<String, Value>,
    ) -> ProviderResult<Map<String, Value>>;

    async fn destroy(
        &self,
        context: &ProviderContext,
        name: &str,
        args: Option<Value>,
        attributes: Option<Map<String, Value>>,
    ) -> ProviderResult<()>;
}

struct Typed<P>(P);

fn read_args<K: ResourceKind>(args: Value) -> ProviderResult<K::Args> {
    K::Args::from_value(args).context(
        Resources::Clear,
        format!("Unable to read the arguments of a '{}'", K::TYPE),
    )
}

fn write_attributes<K: ResourceKind>(
    attributes: K::Attributes,
) -> ProviderResult<Map<String, Value>> {
    attributes.into_map().context(
        Resources::Remaining,
        format!("Unable to record the attributes of a '{}'", K::TYPE),
    )
}

#[async_trait::async_trait]
impl<P> ErasedProvider for Typed<P>
where
    P: Create + Update + Destroy,
{
    async fn create(
        &self,
        context: &ProviderContext,
        name: &str,
        args: Value,
    ) -> ProviderResult<Map<String, Value>> {
        let args = read_args::<P::Kind>(args)?;
        let attributes = self.0.create(Request { context, name, args }).await?;
        write_attributes::<P::Kind>(attributes)
    }

    async fn update(
        &self,
        context: &ProviderContext,
        name: &str,
        args: Value,
        previous_args: Value,
        previous_attributes: Map<String, Value>,
    ) -> ProviderResult<Map<String, Value>> {
        let args = read_args::<P::Kind>(args)?;
        let previous = Previous {
            args: read_args::<P::Kind>(previous_args)?,
            attributes: <P::Kind as ResourceKind>::Attributes::from_map(previous_attributes)
                .context(
                    Resources::Clear,
                    format!("Unable to read the recorded attributes of '{}'", name),
                )?,
        };
        let attributes = self
            .0
            .update(Request { context, name, args }, previous)
            .await?;
        write_attributes::<P::Kind>(attributes)
    }

    async fn destroy(
        &self,
        context: &ProviderContext,
        name: &str,
        args: Option<Value>,
        attributes: Option<Map<String, Value>>,
    ) -> ProviderResult<()> {
        let args = args.and_then(|args| match <P::Kind as ResourceKind>::Args::from_value(args) {
            Ok(args) => Some(args),
            Err(e) => {
                warn!("Unable to read the recorded arguments of '{}': {}", name, e);
                None
            }
        });
        let attributes = attributes.and_then(|attributes| {
            match <P::Kind as ResourceKind>::Attributes::from_map(attributes) {
                Ok(attributes) => Some(attributes),
                Err(e) => {
                    warn!("Unable to read the recorded attributes of '{}': {}", name, e);
                    None
                }
            }
        });
        self.0
            .destroy(Teardown {
                context,
                name,
                args,
                attributes,
            })
            .await
    }
}

/// The set of providers an engine can call, keyed by resource kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn ErasedProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&&str> = self.providers.keys().collect();
        kinds.sort();
        f.debug_struct("ProviderRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any earlier provider for the same kind.
    pub fn register<P>(&mut self, provider: P) -> &mut Self
    where
        P: Create + Update + Destroy + 'static,
    {
        self.providers
            .insert(<P::Kind as ResourceKind>::TYPE, Arc::new(Typed(provider)));
        self
    }

    pub fn with<P>(mut self, provider: P) -> Self
    where
        P: Create + Update + Destroy + 'static,
    {
        self.register(provider);
        self
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    /// Make sure every declared resource has a provider before anything is touched.
    pub fn check(&self, stack: &Stack) -> Result<(), RegistryError> {
        for descriptor in stack.resources() {
            if !self.supports(descriptor.kind()) {
                return MissingProviderSnafu {
                    kind: descriptor.kind(),
                    resource: descriptor.name(),
                }
                .fail();
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, kind: &str) -> ProviderResult<Arc<dyn ErasedProvider>> {
        self.providers
            .get(kind)
            .cloned()
            .context(
                Resources::Clear,
                format!("No provider is registered for resource kind '{}'", kind),
            )
    }
}
