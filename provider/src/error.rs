use crate::registry::RegistryError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// The error type returned by the [`Engine`](crate::Engine) when it cannot run at all. Failures of
/// individual resources are not errors at this level; they are recorded in the state and reported
/// in the [`ApplyReport`](crate::ApplyReport).
#[derive(Debug)]
pub enum EngineError {
    Model(stack_model::Error),
    Registry(RegistryError),
    Store(StoreError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl ErrorEnum for EngineError {
    fn variant_name(&self) -> &'static str {
        match self {
            EngineError::Model(_) => "Stack error",
            EngineError::Registry(_) => "Provider registry error",
            EngineError::Store(_) => "State store error",
        }
    }

    fn inner(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            EngineError::Model(e) => Some(e as &(dyn Error + Send + Sync + 'static)),
            EngineError::Registry(e) => Some(e as &(dyn Error + Send + Sync + 'static)),
            EngineError::Store(e) => Some(e as &(dyn Error + Send + Sync + 'static)),
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner_as_source()
    }
}

impl From<stack_model::Error> for EngineError {
    fn from(e: stack_model::Error) -> Self {
        Self::Model(e)
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// De-duplicates the `Display` and `Error` implementations of error enums that wrap the errors of
/// other subsystems.
pub(crate) trait ErrorEnum {
    fn variant_name(&self) -> &'static str;
    fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)>;

    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.inner() {
            None => Display::fmt(self.variant_name(), f),
            Some(inner) => write!(f, "{}: {}", self.variant_name(), inner),
        }
    }

    fn inner_as_source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner().map(|some| some as &(dyn Error + 'static))
    }
}
