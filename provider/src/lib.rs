/*!

The `resource-provider` library reconciles a declared [`Stack`](stack_model::Stack) against the
cloud. You implement the [`Create`], [`Update`] and [`Destroy`] traits for each resource kind, add
the implementations to a [`ProviderRegistry`], and hand the registry and a [`StateStore`] to an
[`Engine`], which plans, applies and destroys stacks.

!*/

pub mod engine;
pub mod error;
pub mod provider;
pub mod registry;
pub mod store;

pub use engine::{ApplyReport, Completed, Engine, Failure};
pub use error::{EngineError, EngineResult};
pub use provider::{
    AsResources, Attributes, Create, Destroy, IntoProviderError, Previous, ProviderError,
    ProviderResult, Request, Resources, Teardown, Update,
};
pub use registry::{ProviderRegistry, RegistryError};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError, StoreResult};
pub use stack_model::{Configuration, ResourceAction};
