/*!

The planner compares the declared [`Stack`] with the recorded [`StackState`] and decides what has to
happen to each resource. Attributes of resources that are about to change cannot be known before
they are applied, so anything that reads them is planned as a *pending* step whose final operation
is decided again when the engine reaches it.

!*/

use crate::error::Result;
use crate::resource::{changed_paths, Descriptor};
use crate::state::{ResourceState, StackState};
use crate::{AttributeSource, Stack};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Same,
    Create,
    Update,
    Replace,
    Delete,
}

impl Operation {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operation::Same => " ",
            Operation::Create => "+",
            Operation::Update => "~",
            Operation::Replace => "+-",
            Operation::Delete => "-",
        }
    }
}

serde_plain::derive_display_from_serialize!(Operation);

/// What the planner decided for one resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub kind: String,
    pub operation: Operation,
    /// JSON pointers of the arguments that differ from the recorded ones.
    pub changed: Vec<String>,
    /// The arguments depend on a resource that changes first, so they are not known yet.
    pub pending: bool,
    /// The resolved arguments, when they are known.
    pub args: Option<Value>,
    /// The step deletes a leftover from an earlier replacement, not the declared resource.
    #[serde(default)]
    pub replaced: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// The decision for one resource, without its identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    pub operation: Operation,
    pub changed: Vec<String>,
    pub pending: bool,
}

impl Decision {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            changed: Vec::new(),
            pending: false,
        }
    }
}

/// Hides the attributes of resources that are going to change.
struct PlanningView<'a> {
    state: &'a StackState,
    changing: BTreeSet<String>,
}

impl AttributeSource for PlanningView<'_> {
    fn attributes(&self, resource: &str) -> Option<&Map<String, Value>> {
        if self.changing.contains(resource) {
            None
        } else {
            self.state.attributes(resource)
        }
    }
}

impl Plan {
    pub fn compute(stack: &Stack, state: &StackState) -> Result<Self> {
        stack.validate()?;
        let mut view = PlanningView {
            state,
            changing: BTreeSet::new(),
        };
        let mut steps = Vec::new();

        for layer in stack.creation_layers()? {
            for name in layer {
                let descriptor = match stack.resource(&name) {
                    Some(some) => some,
                    None => continue,
                };
                let args = descriptor.args().resolve(&view)?;
                if let Some(args) = &args {
                    descriptor.validate_args(args)?;
                }
                let decision = Self::decide(descriptor, state.get(&name), args.as_ref());
                if decision.operation != Operation::Same {
                    view.changing.insert(name.clone());
                }
                steps.push(Step {
                    name,
                    kind: descriptor.kind().to_string(),
                    operation: decision.operation,
                    changed: decision.changed,
                    pending: decision.pending,
                    args,
                    replaced: false,
                });
            }
        }

        let declared = stack.names();
        for layer in state.deletion_layers()? {
            for name in layer.into_iter().filter(|name| !declared.contains(name)) {
                let kind = state
                    .get(&name)
                    .map(|r| r.kind.clone())
                    .unwrap_or_default();
                steps.push(Step {
                    name,
                    kind,
                    operation: Operation::Delete,
                    changed: Vec::new(),
                    pending: false,
                    args: None,
                    replaced: false,
                });
            }
        }

        for layer in state.replaced_deletion_layers()? {
            for replaced in layer.into_iter().filter_map(|i| state.replaced.get(i)) {
                steps.push(Step {
                    name: replaced.name.clone(),
                    kind: replaced.resource.kind.clone(),
                    operation: Operation::Delete,
                    changed: Vec::new(),
                    pending: false,
                    args: None,
                    replaced: true,
                });
            }
        }

        Ok(Self { steps })
    }

    /// Decide the operation for one declared resource given its recorded state and its resolved
    /// arguments (`None` when they depend on something not yet known).
    pub fn decide(
        descriptor: &Descriptor,
        recorded: Option<&ResourceState>,
        args: Option<&Value>,
    ) -> Decision {
        let recorded = match recorded {
            None => {
                return Decision {
                    pending: args.is_none(),
                    ..Decision::new(Operation::Create)
                }
            }
            Some(some) => some,
        };
        if recorded.kind != descriptor.kind() || recorded.is_failed_create() {
            return Decision {
                pending: args.is_none(),
                ..Decision::new(Operation::Replace)
            };
        }
        let args = match args {
            None => {
                return Decision {
                    pending: true,
                    ..Decision::new(Operation::Update)
                }
            }
            Some(some) => some,
        };
        let changed = changed_paths(&recorded.args, args);
        let operation = if changed.is_empty() {
            if recorded.is_created() {
                Operation::Same
            } else {
                Operation::Update
            }
        } else if descriptor.requires_replacement(&changed) {
            Operation::Replace
        } else {
            Operation::Update
        };
        Decision {
            operation,
            changed,
            pending: false,
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for step in &self.steps {
            match step.operation {
                Operation::Same => summary.same += 1,
                Operation::Create => summary.create += 1,
                Operation::Update => summary.update += 1,
                Operation::Replace => summary.replace += 1,
                Operation::Delete => summary.delete += 1,
            }
        }
        summary
    }

    /// True when applying the plan would not touch anything.
    pub fn is_noop(&self) -> bool {
        self.steps.iter().all(|step| step.operation == Operation::Same)
    }

    /// The step for the declared resource `name`.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps
            .iter()
            .find(|step| step.name == name && !step.replaced)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub same: usize,
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.same
        )
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for step in &self.steps {
            write!(f, "{:>2} {} ({})", step.operation.symbol(), step.name, step.kind)?;
            if step.pending {
                write!(f, " [pending]")?;
            }
            if step.replaced {
                write!(f, " [replaced]")?;
            }
            if !step.changed.is_empty() {
                write!(f, " changed: {}", step.changed.join(", "))?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", self.summary())
    }
}
