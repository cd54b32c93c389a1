use stack_model::ErrorResources;
use std::fmt::{Display, Formatter};

/// When a [`Create`], [`Update`] or [`Destroy`] implementation returns an error, it must state
/// whether cloud resources were left behind. The engine records this with the failed resource so
/// that a later `destroy` knows whether there is anything to clean up.
///
/// [`Create`]: crate::Create
/// [`Update`]: crate::Update
/// [`Destroy`]: crate::Destroy
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resources {
    /// Resources were left behind and the provider can never destroy them. The engine drops them
    /// from the state without calling `destroy`.
    Orphaned,

    /// Resources were left behind and `Destroy::destroy` may be able to remove them.
    Remaining,

    /// Nothing was left behind. A failed creation of this kind leaves no trace in the state.
    Clear,

    /// It is unknown whether resources were left behind. The engine treats this like `Remaining`.
    Unknown,
}

/// Describe whether a value represents resources that still exist.
pub trait AsResources {
    fn as_resources(&self) -> Resources;
}

impl AsResources for Resources {
    fn as_resources(&self) -> Resources {
        *self
    }
}

impl AsResources for &Resources {
    fn as_resources(&self) -> Resources {
        **self
    }
}

/// The error type returned by provider implementations.
#[derive(Debug)]
pub struct ProviderError {
    resources: Resources,
    context: Option<String>,
    inner: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

/// The result type returned by provider implementations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn new_with_source_and_context<R, S, E>(resources: R, context: S, source: E) -> Self
    where
        R: AsResources,
        S: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            resources: resources.as_resources(),
            context: Some(context.into()),
            inner: Some(source.into()),
        }
    }

    pub fn new_with_source<R, E>(resources: R, source: E) -> Self
    where
        R: AsResources,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            resources: resources.as_resources(),
            context: None,
            inner: Some(source.into()),
        }
    }

    pub fn new_with_context<R, S>(resources: R, context: S) -> Self
    where
        R: AsResources,
        S: Into<String>,
    {
        Self {
            resources: resources.as_resources(),
            context: Some(context.into()),
            inner: None,
        }
    }

    pub fn resources(&self) -> Resources {
        self.resources
    }

    /// The same error with a different resource classification. Used when a caller knows more
    /// than the callee, e.g. a create succeeded before a later step in the same provider failed.
    pub fn with_resources<R: AsResources>(mut self, resources: R) -> Self {
        self.resources = resources.as_resources();
        self
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.inner.as_ref().map(|some| some.as_ref())
    }

    /// The message without the resource classification, as recorded in the stack state.
    pub fn message(&self) -> String {
        match (self.context(), self.inner()) {
            (Some(context), Some(inner)) => format!("{}: {}", context, inner),
            (Some(context), None) => context.to_string(),
            (None, Some(inner)) => inner.to_string(),
            (None, None) => self.resources.message().to_string(),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.resources())?;
        if let Some(context) = self.context() {
            write!(f, ", {}", context)?;
        }
        if let Some(inner) = self.inner() {
            write!(f, ": {}", inner)?;
        }
        Ok(())
    }
}

impl Resources {
    pub fn message(&self) -> &'static str {
        match self {
            Resources::Orphaned => "An error left orphaned resources that cannot be destroyed",
            Resources::Remaining => "An error left resources behind that can be destroyed",
            Resources::Clear => "An error occurred but no resources were left behind",
            Resources::Unknown => {
                "An error occurred and it is unknown whether or not resources were left behind"
            }
        }
    }
}

impl Display for Resources {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.message(), f)
    }
}

impl From<Resources> for ErrorResources {
    fn from(resources: Resources) -> Self {
        match resources {
            Resources::Orphaned => ErrorResources::Orphaned,
            Resources::Remaining => ErrorResources::Remaining,
            Resources::Clear => ErrorResources::Clear,
            Resources::Unknown => ErrorResources::Unknown,
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Convert errors and options into a [`ProviderError`] with a familiar `context` function.
pub trait IntoProviderError<T> {
    fn context<R, S>(self, resources: R, message: S) -> ProviderResult<T>
    where
        S: Into<String>,
        R: AsResources;
}

impl<T, E> IntoProviderError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<R, S>(self, resources: R, message: S) -> ProviderResult<T>
    where
        S: Into<String>,
        R: AsResources,
    {
        self.map_err(|e| ProviderError::new_with_source_and_context(resources, message, e))
    }
}

impl<T> IntoProviderError<T> for std::option::Option<T> {
    fn context<R, S>(self, r: R, m: S) -> Result<T, ProviderError>
    where
        S: Into<String>,
        R: AsResources,
    {
        self.ok_or_else(|| ProviderError::new_with_context(r, m))
    }
}
