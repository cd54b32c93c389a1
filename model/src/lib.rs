/*!

This library provides the declarative resource model: deferred values, resource kinds, the stack
graph, the recorded state and the planner that compares the two.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use configuration::Configuration;
pub use context::{ProviderContext, DEFAULT_REGION};
pub use error::{Error, Result};
pub use field_ref::FieldRef;
pub use output::{AttributeSource, NothingMaterialized, Output};
pub use plan::{Decision, Operation, Plan, Step, Summary};
pub use resource::{
    changed_paths, Descriptor, ErrorResources, Resource, ResourceAction, ResourceKind,
    ResourceOptions,
};
pub use stack::Stack;
pub use state::{ReplacedResource, ResourceState, ResourceStatus, StackState};

mod configuration;
mod context;
mod error;
mod field_ref;
mod graph;
mod output;
mod plan;
mod resource;
mod stack;
mod state;
