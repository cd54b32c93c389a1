use crate::error::Result;
use crate::graph::topological_layers;
use crate::resource::{ErrorResources, ResourceAction};
use crate::AttributeSource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// The recorded result of the last reconciliation: what exists in the cloud, the arguments it was
/// created with, and the attributes the provider reported.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackState {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Resources that were replaced by a newer resource of the same name and still have to be
    /// deleted. They are deleted once everything that depended on them has moved on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaced: Vec<ReplacedResource>,
}

/// The record of a resource that has been superseded by its replacement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacedResource {
    pub name: String,
    pub resource: ResourceState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    /// The kind's type token, e.g. `aws:iam:Role`.
    pub kind: String,
    /// The fully resolved arguments of the last successful (or attempted) operation.
    pub args: Value,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// The resources this one was ordered after when it was last applied. Used to order deletion
    /// of resources that are no longer declared.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub status: ResourceStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum ResourceStatus {
    Created,
    #[serde(rename_all = "camelCase")]
    Failed {
        action: ResourceAction,
        error: String,
        error_resources: ErrorResources,
    },
}

impl Default for ResourceStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl Display for ResourceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Created => write!(f, "created"),
            ResourceStatus::Failed {
                action,
                error,
                error_resources,
            } => write!(
                f,
                "{} failed: {} ({})",
                action,
                error,
                error_resources.description()
            ),
        }
    }
}

impl ResourceState {
    pub fn is_created(&self) -> bool {
        matches!(self.status, ResourceStatus::Created)
    }

    /// A failed first creation: the recorded attributes are whatever the provider managed to
    /// report before failing and must not be read by dependents.
    pub fn is_failed_create(&self) -> bool {
        matches!(
            self.status,
            ResourceStatus::Failed {
                action: ResourceAction::Create,
                ..
            }
        )
    }
}

impl StackState {
    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.replaced.is_empty()
    }

    /// Resources whose last operation failed.
    pub fn failed(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources.iter().filter(|(_, r)| !r.is_created())
    }

    /// The recorded resources in the order they must be deleted: dependents first.
    pub fn deletion_layers(&self) -> Result<Vec<Vec<String>>> {
        let names: BTreeSet<String> = self.resources.keys().cloned().collect();
        let dependencies = self
            .resources
            .iter()
            .map(|(name, r)| (name.clone(), r.dependencies.clone()))
            .collect();
        let mut layers = topological_layers(&names, &dependencies)?;
        layers.reverse();
        Ok(layers)
    }

    /// Indices into `replaced` in the order they must be deleted: a replaced resource goes before
    /// the replaced resources it depended on.
    pub fn replaced_deletion_layers(&self) -> Result<Vec<Vec<usize>>> {
        let names: BTreeSet<String> = self.replaced.iter().map(|r| r.name.clone()).collect();
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for replaced in &self.replaced {
            dependencies
                .entry(replaced.name.clone())
                .or_default()
                .extend(replaced.resource.dependencies.iter().cloned());
        }
        let mut layers = topological_layers(&names, &dependencies)?;
        layers.reverse();
        Ok(layers
            .into_iter()
            .map(|layer| {
                self.replaced
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| layer.contains(&r.name))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect())
    }

    /// Whether a recorded or replaced resource still depends on `name`.
    pub fn is_depended_on(&self, name: &str) -> bool {
        self.resources
            .iter()
            .any(|(other, r)| other != name && r.dependencies.contains(name))
            || self
                .replaced
                .iter()
                .any(|r| r.name != name && r.resource.dependencies.contains(name))
    }
}

impl AttributeSource for StackState {
    fn attributes(&self, resource: &str) -> Option<&Map<String, Value>> {
        self.resources
            .get(resource)
            .filter(|r| !r.is_failed_create())
            .map(|r| &r.attributes)
    }
}
