mod error;

pub use self::error::{AsResources, IntoProviderError, ProviderError, ProviderResult, Resources};
use stack_model::{ProviderContext, ResourceKind};

/// Attributes reported for a resource of kind `K`.
pub type Attributes<K> = <K as ResourceKind>::Attributes;

/// Everything a provider needs to create or update one resource.
pub struct Request<'a, K>
where
    K: ResourceKind,
{
    /// The account, region and credentials to operate in.
    pub context: &'a ProviderContext,

    /// The logical name of the resource. Providers derive physical names from it when the
    /// arguments do not carry one.
    pub name: &'a str,

    /// The resolved arguments.
    pub args: K::Args,
}

/// What was recorded for a resource before the current operation.
pub struct Previous<K>
where
    K: ResourceKind,
{
    pub args: K::Args,
    pub attributes: K::Attributes,
}

/// What a provider is given to destroy a resource. Either part may be missing when the recorded
/// state could not be read back, in which case the provider should do its best with what it has.
pub struct Teardown<'a, K>
where
    K: ResourceKind,
{
    pub context: &'a ProviderContext,
    pub name: &'a str,
    pub args: Option<K::Args>,
    pub attributes: Option<K::Attributes>,
}

/// You implement [`Create`] to bring a resource of one [`ResourceKind`] into existence.
///
/// The returned attributes are recorded in the stack state and are what other resources read
/// through their deferred arguments, so they must include every identifier a later [`Update`] or
/// [`Destroy`] needs.
#[async_trait::async_trait]
pub trait Create: Send + Sync {
    type Kind: ResourceKind;

    async fn create(&self, request: Request<'_, Self::Kind>)
        -> ProviderResult<Attributes<Self::Kind>>;
}

/// You implement [`Update`] to apply changed arguments to an existing resource in place. The
/// engine never calls it for a change that the kind declares as forcing replacement.
#[async_trait::async_trait]
pub trait Update: Create {
    async fn update(
        &self,
        request: Request<'_, Self::Kind>,
        previous: Previous<Self::Kind>,
    ) -> ProviderResult<Attributes<Self::Kind>>;
}

/// You implement [`Destroy`] to remove a resource that was previously created. A resource that is
/// already gone is not an error.
#[async_trait::async_trait]
pub trait Destroy: Create {
    async fn destroy(&self, teardown: Teardown<'_, Self::Kind>) -> ProviderResult<()>;
}
