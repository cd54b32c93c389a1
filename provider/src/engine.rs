/*!

The `engine` module drives providers to make the recorded state match a declared [`Stack`].

Resources are visited in the stack's creation layers. Members of a layer are reconciled
concurrently, and the state is saved after every individual result so that an interrupted run
loses nothing. A failed resource does not stop the run: its dependents are skipped, everything
else continues, and nothing that already succeeded is rolled back.

A resource replaced create-before-delete keeps its old incarnation recorded under
`StackState::replaced` until every layer has been applied. Only then, once the dependents point at
the replacement, are the old incarnations deleted, dependents first. An old incarnation whose
dependents failed or were skipped stays recorded for a later run.

!*/

use crate::error::EngineResult;
use crate::provider::{ProviderError, Resources};
use crate::registry::ProviderRegistry;
use crate::store::{StateStore, StoreResult};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use stack_model::{
    Descriptor, ErrorResources, Operation, Plan, ProviderContext, ReplacedResource,
    ResourceAction, ResourceState, ResourceStatus, Stack, StackState, Summary,
};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// A resource operation that did not succeed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub name: String,
    pub action: ResourceAction,
    pub error: String,
    pub error_resources: ErrorResources,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of '{}' failed: {} ({})",
            self.action,
            self.name,
            self.error,
            self.error_resources.description()
        )
    }
}

/// A resource operation that completed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    pub name: String,
    pub operation: Operation,
}

/// What an `apply` or `destroy` run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub completed: Vec<Completed>,
    pub failures: Vec<Failure>,
    /// Resources that were not attempted because something they depend on failed.
    pub skipped: Vec<String>,
    pub outputs: Map<String, Value>,
}

impl ApplyReport {
    pub fn failed(&self) -> &[Failure] {
        &self.failures
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// Counts of the operations that completed.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for completed in &self.completed {
            match completed.operation {
                Operation::Same => summary.same += 1,
                Operation::Create => summary.create += 1,
                Operation::Update => summary.update += 1,
                Operation::Replace => summary.replace += 1,
                Operation::Delete => summary.delete += 1,
            }
        }
        summary
    }

    /// True when nothing was created, updated, replaced or deleted.
    pub fn is_noop(&self) -> bool {
        self.completed
            .iter()
            .all(|completed| completed.operation == Operation::Same)
    }
}

impl Display for ApplyReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for completed in &self.completed {
            if completed.operation != Operation::Same {
                writeln!(f, "{:>2} {}", completed.operation.symbol(), completed.name)?;
            }
        }
        for failure in &self.failures {
            writeln!(f, " ! {}", failure)?;
        }
        for skipped in &self.skipped {
            writeln!(f, " ? {} (skipped)", skipped)?;
        }
        write!(f, "{}", self.summary())
    }
}

/// How the recorded state changes as the result of one resource operation.
enum Record {
    Keep,
    Set(ResourceState),
    Remove,
}

struct StepResult {
    name: String,
    operation: Operation,
    record: Record,
    failure: Option<Failure>,
    /// Whether dependents must be skipped.
    blocks: bool,
    /// The old incarnation of a resource that was replaced create-before-delete.
    replaced: Option<ResourceState>,
}

impl StepResult {
    fn done(name: &str, operation: Operation, record: Record) -> Self {
        Self {
            name: name.to_string(),
            operation,
            record,
            failure: None,
            blocks: false,
            replaced: None,
        }
    }

    fn failed(
        name: &str,
        operation: Operation,
        action: ResourceAction,
        record: Record,
        error: &ProviderError,
    ) -> Self {
        error!("Unable to {} '{}': {}", action, name, error);
        Self {
            name: name.to_string(),
            operation,
            record,
            failure: Some(Failure {
                name: name.to_string(),
                action,
                error: error.message(),
                error_resources: error.resources().into(),
            }),
            blocks: true,
            replaced: None,
        }
    }
}

fn failed_status(action: ResourceAction, error: &ProviderError) -> ResourceStatus {
    ResourceStatus::Failed {
        action,
        error: error.message(),
        error_resources: error.resources().into(),
    }
}

fn with_status(record: &ResourceState, status: ResourceStatus) -> ResourceState {
    ResourceState {
        status,
        ..record.clone()
    }
}

/// The `Engine` reconciles stacks through a [`ProviderRegistry`] and records the result in a
/// [`StateStore`].
#[derive(Debug)]
pub struct Engine<S>
where
    S: StateStore,
{
    registry: ProviderRegistry,
    store: S,
}

impl<S> Engine<S>
where
    S: StateStore,
{
    pub fn new(registry: ProviderRegistry, store: S) -> Self {
        Self { registry, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Compute what `apply` would do without calling any provider.
    pub async fn preview(&self, stack: &Stack) -> EngineResult<Plan> {
        let state = self.store.load().await?;
        Ok(Plan::compute(stack, &state)?)
    }

    /// The outputs recorded by the last `apply`.
    pub async fn outputs(&self) -> EngineResult<Map<String, Value>> {
        Ok(self.store.load().await?.outputs)
    }

    /// Re-evaluate the exported outputs against the recorded state and save them.
    pub async fn refresh_outputs(&self, stack: &Stack) -> EngineResult<Map<String, Value>> {
        let mut state = self.store.load().await?;
        state.outputs = stack.resolve_exports(&state)?;
        self.store.save(&state).await?;
        Ok(state.outputs)
    }

    /// Make the cloud match `stack`.
    pub async fn apply(&self, stack: &Stack) -> EngineResult<ApplyReport> {
        stack.validate()?;
        self.registry.check(stack)?;
        let context = stack.context();
        let mut state = self.store.load().await?;
        let mut report = ApplyReport::default();
        let mut blocked = BTreeSet::new();

        for layer in stack.creation_layers()? {
            let snapshot = state.clone();
            let mut tasks = FuturesUnordered::new();
            for name in layer {
                let descriptor = match stack.resource(&name) {
                    Some(some) => some,
                    None => continue,
                };
                if descriptor
                    .dependencies()
                    .iter()
                    .any(|dependency| blocked.contains(dependency))
                {
                    warn!("Skipping '{}' because a dependency failed", name);
                    report.skipped.push(name.clone());
                    blocked.insert(name);
                    continue;
                }
                tasks.push(self.reconcile(context, descriptor, &snapshot));
            }
            let mut saved = Ok(());
            while let Some(result) = tasks.next().await {
                if result.blocks {
                    blocked.insert(result.name.clone());
                }
                Self::record(&mut state, &mut report, result);
                self.save_step(&state, &mut saved).await;
            }
            saved?;
        }

        self.delete_orphans(stack, &mut state, &mut report).await?;
        // Orphans that could not be deleted may still use an old incarnation.
        blocked.extend(
            state
                .resources
                .keys()
                .filter(|name| stack.resource(name).is_none())
                .cloned(),
        );
        self.delete_replaced(context, &mut state, &mut report, &blocked)
            .await?;

        state.outputs = stack.resolve_exports(&state)?;
        self.store.save(&state).await?;
        report.outputs = state.outputs.clone();
        info!("Apply finished: {}", report.summary());
        Ok(report)
    }

    /// Delete every recorded resource, dependents first. Stops after the first layer in which a
    /// deletion failed, since everything later in the order is depended on by what is left.
    pub async fn destroy(&self, stack: &Stack) -> EngineResult<ApplyReport> {
        let context = stack.context();
        let mut state = self.store.load().await?;
        let mut report = ApplyReport::default();

        // Old incarnations only depend on recorded resources, so they go first.
        self.delete_replaced(context, &mut state, &mut report, &BTreeSet::new())
            .await?;
        if !report.failures.is_empty() {
            report.skipped = state.resources.keys().cloned().collect();
            self.store.save(&state).await?;
            return Ok(report);
        }

        let layers = state.deletion_layers()?;
        let mut remaining = layers.iter().flatten().cloned().collect::<Vec<_>>();
        for layer in layers {
            let snapshot = state.clone();
            let mut tasks = FuturesUnordered::new();
            for name in &layer {
                if let Some(record) = snapshot.get(name) {
                    tasks.push(self.delete(context, name, record));
                }
            }
            let mut saved = Ok(());
            while let Some(result) = tasks.next().await {
                Self::record(&mut state, &mut report, result);
                self.save_step(&state, &mut saved).await;
            }
            saved?;
            remaining.retain(|name| !layer.contains(name));
            if !report.failures.is_empty() {
                report.skipped = remaining;
                break;
            }
        }

        if state.is_empty() {
            state.outputs.clear();
        }
        self.store.save(&state).await?;
        report.outputs = state.outputs.clone();
        info!("Destroy finished: {}", report.summary());
        Ok(report)
    }

    /// Save the state after one result of a layer. A failed save must not drop the rest of the
    /// layer, whose provider calls are already under way, so every later result is still recorded
    /// and saved, and `saved` keeps the first error for the caller to return once the layer is
    /// drained.
    async fn save_step(&self, state: &StackState, saved: &mut StoreResult<()>) {
        if let Err(e) = self.store.save(state).await {
            error!("Unable to save the stack state: {}", e);
            if saved.is_ok() {
                *saved = Err(e);
            }
        }
    }

    fn record(state: &mut StackState, report: &mut ApplyReport, result: StepResult) {
        match result.record {
            Record::Keep => {}
            Record::Set(record) => {
                state.resources.insert(result.name.clone(), record);
            }
            Record::Remove => {
                state.resources.remove(&result.name);
            }
        }
        if let Some(resource) = result.replaced {
            state.replaced.push(ReplacedResource {
                name: result.name.clone(),
                resource,
            });
        }
        match result.failure {
            Some(failure) => report.failures.push(failure),
            None => report.completed.push(Completed {
                name: result.name,
                operation: result.operation,
            }),
        }
    }

    /// Delete recorded resources that are no longer declared. A resource is left alone while
    /// anything still recorded depends on it.
    async fn delete_orphans(
        &self,
        stack: &Stack,
        state: &mut StackState,
        report: &mut ApplyReport,
    ) -> EngineResult<()> {
        let declared = stack.names();
        for layer in state.deletion_layers()? {
            let snapshot = state.clone();
            let mut tasks = FuturesUnordered::new();
            for name in layer.iter().filter(|name| !declared.contains(*name)) {
                if snapshot.is_depended_on(name) {
                    warn!("Not deleting '{}' because other resources depend on it", name);
                    report.skipped.push(name.clone());
                    continue;
                }
                if let Some(record) = snapshot.get(name) {
                    tasks.push(self.delete(stack.context(), name, record));
                }
            }
            let mut saved = Ok(());
            while let Some(result) = tasks.next().await {
                Self::record(state, report, result);
                self.save_step(state, &mut saved).await;
            }
            saved?;
        }
        Ok(())
    }

    /// Bring one declared resource in line with its declaration.
    async fn reconcile(
        &self,
        context: &ProviderContext,
        descriptor: &Descriptor,
        snapshot: &StackState,
    ) -> StepResult {
        let name = descriptor.name();
        let recorded = snapshot.get(name);
        let action = match recorded {
            None => ResourceAction::Create,
            Some(_) => ResourceAction::Update,
        };

        let args = match descriptor.args().resolve(snapshot) {
            Ok(Some(args)) => args,
            Ok(None) => {
                let error = ProviderError::new_with_context(
                    Resources::Clear,
                    "Arguments depend on attributes that are not available",
                );
                return StepResult::failed(name, Operation::Same, action, Record::Keep, &error);
            }
            Err(e) => {
                let error = ProviderError::new_with_source_and_context(
                    Resources::Clear,
                    "Unable to resolve arguments",
                    e,
                );
                return StepResult::failed(name, Operation::Same, action, Record::Keep, &error);
            }
        };
        if let Err(e) = descriptor.validate_args(&args) {
            let error = ProviderError::new_with_source(Resources::Clear, e);
            return StepResult::failed(name, Operation::Same, action, Record::Keep, &error);
        }
        debug!("Resolved arguments of '{}': {}", name, args);

        let dependencies = descriptor.dependencies();
        let decision = Plan::decide(descriptor, recorded, Some(&args));
        match (decision.operation, recorded) {
            (Operation::Create, _) | (_, None) => {
                self.create(context, descriptor, args, dependencies, None)
                    .await
            }
            (Operation::Update, Some(recorded)) => {
                info!(
                    "Updating '{}' ({}): {}",
                    name,
                    descriptor.kind(),
                    decision.changed.join(", ")
                );
                self.update(context, descriptor, args, dependencies, recorded)
                    .await
            }
            (Operation::Replace, Some(recorded)) => {
                info!(
                    "Replacing '{}' ({}): {}",
                    name,
                    descriptor.kind(),
                    decision.changed.join(", ")
                );
                self.replace(context, descriptor, args, dependencies, recorded)
                    .await
            }
            (Operation::Same, Some(recorded)) | (Operation::Delete, Some(recorded)) => {
                let record = if recorded.dependencies != dependencies {
                    Record::Set(ResourceState {
                        dependencies,
                        ..recorded.clone()
                    })
                } else {
                    Record::Keep
                };
                StepResult::done(name, Operation::Same, record)
            }
        }
    }

    /// Create a resource. `replacing` is the record of a resource that was already deleted to make
    /// way for this one.
    async fn create(
        &self,
        context: &ProviderContext,
        descriptor: &Descriptor,
        args: Value,
        dependencies: BTreeSet<String>,
        replacing: Option<&ResourceState>,
    ) -> StepResult {
        let name = descriptor.name();
        let operation = match replacing {
            None => Operation::Create,
            Some(_) => Operation::Replace,
        };
        info!("Creating '{}' ({})", name, descriptor.kind());
        let result = match self.registry.get(descriptor.kind()) {
            Ok(provider) => provider.create(context, name, args.clone()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(attributes) => StepResult::done(
                name,
                operation,
                Record::Set(ResourceState {
                    kind: descriptor.kind().to_string(),
                    args,
                    attributes,
                    dependencies,
                    status: ResourceStatus::Created,
                }),
            ),
            Err(e) => {
                let record = if e.resources() == Resources::Clear {
                    match replacing {
                        None => Record::Keep,
                        Some(_) => Record::Remove,
                    }
                } else {
                    Record::Set(ResourceState {
                        kind: descriptor.kind().to_string(),
                        args,
                        attributes: Map::new(),
                        dependencies,
                        status: failed_status(ResourceAction::Create, &e),
                    })
                };
                StepResult::failed(name, operation, ResourceAction::Create, record, &e)
            }
        }
    }

    async fn update(
        &self,
        context: &ProviderContext,
        descriptor: &Descriptor,
        args: Value,
        dependencies: BTreeSet<String>,
        recorded: &ResourceState,
    ) -> StepResult {
        let name = descriptor.name();
        let result = match self.registry.get(descriptor.kind()) {
            Ok(provider) => {
                provider
                    .update(
                        context,
                        name,
                        args.clone(),
                        recorded.args.clone(),
                        recorded.attributes.clone(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(attributes) => StepResult::done(
                name,
                Operation::Update,
                Record::Set(ResourceState {
                    kind: descriptor.kind().to_string(),
                    args,
                    attributes,
                    dependencies,
                    status: ResourceStatus::Created,
                }),
            ),
            Err(e) => StepResult::failed(
                name,
                Operation::Update,
                ResourceAction::Update,
                Record::Set(with_status(
                    recorded,
                    failed_status(ResourceAction::Update, &e),
                )),
                &e,
            ),
        }
    }

    /// Replace a resource. The replacement is created first and the old resource is queued for
    /// deletion unless the declaration asks otherwise, or the old resource cannot coexist with a
    /// new one (it is of a different kind or never finished creating).
    async fn replace(
        &self,
        context: &ProviderContext,
        descriptor: &Descriptor,
        args: Value,
        dependencies: BTreeSet<String>,
        recorded: &ResourceState,
    ) -> StepResult {
        let name = descriptor.name();
        let delete_first = descriptor.options().delete_before_replace
            || recorded.is_failed_create()
            || recorded.kind != descriptor.kind();

        if delete_first {
            if let Err(e) = self.destroy_recorded(context, name, recorded).await {
                let record = if recorded.is_failed_create() {
                    Record::Keep
                } else {
                    Record::Set(with_status(
                        recorded,
                        failed_status(ResourceAction::Delete, &e),
                    ))
                };
                return StepResult::failed(
                    name,
                    Operation::Replace,
                    ResourceAction::Delete,
                    record,
                    &e,
                );
            }
            return self
                .create(context, descriptor, args, dependencies, Some(recorded))
                .await;
        }

        let created = self
            .create(context, descriptor, args, dependencies, None)
            .await;
        if created.failure.is_some() {
            // The old resource is untouched, so it stays recorded as it was apart from the status.
            let record = match &created.failure {
                Some(failure) => Record::Set(with_status(
                    recorded,
                    ResourceStatus::Failed {
                        action: ResourceAction::Update,
                        error: failure.error.clone(),
                        error_resources: failure.error_resources,
                    },
                )),
                None => Record::Keep,
            };
            return StepResult {
                operation: Operation::Replace,
                record,
                ..created
            };
        }

        // The old resource is deleted after its dependents have moved to the replacement.
        StepResult {
            operation: Operation::Replace,
            replaced: Some(recorded.clone()),
            ..created
        }
    }

    /// Delete the old incarnations of replaced resources, dependents first. An old incarnation is
    /// kept while a dependent of its name is in `blocked`, since that dependent may still use it.
    /// Stops after the first layer with a failure, because what is left is depended on by it.
    async fn delete_replaced(
        &self,
        context: &ProviderContext,
        state: &mut StackState,
        report: &mut ApplyReport,
        blocked: &BTreeSet<String>,
    ) -> EngineResult<()> {
        if state.replaced.is_empty() {
            return Ok(());
        }
        let mut held: BTreeSet<String> = state
            .replaced
            .iter()
            .map(|replaced| replaced.name.clone())
            .filter(|name| {
                state.resources.iter().any(|(dependent, r)| {
                    r.dependencies.contains(name) && blocked.contains(dependent)
                })
            })
            .collect();
        // A held old incarnation still uses the old incarnations of its dependencies.
        loop {
            let more: Vec<String> = state
                .replaced
                .iter()
                .filter(|replaced| held.contains(&replaced.name))
                .flat_map(|replaced| replaced.resource.dependencies.iter())
                .filter(|dependency| {
                    !held.contains(*dependency)
                        && state.replaced.iter().any(|r| &r.name == *dependency)
                })
                .cloned()
                .collect();
            if more.is_empty() {
                break;
            }
            held.extend(more);
        }

        let mut deleted = BTreeSet::new();
        for layer in state.replaced_deletion_layers()? {
            let snapshot = state.clone();
            let mut tasks = FuturesUnordered::new();
            for index in layer {
                let replaced = match snapshot.replaced.get(index) {
                    Some(some) => some,
                    None => continue,
                };
                if held.contains(&replaced.name) {
                    warn!(
                        "Keeping the replaced '{}' because a resource that used it failed",
                        replaced.name
                    );
                    continue;
                }
                tasks.push(async move {
                    let result = self
                        .destroy_recorded(context, &replaced.name, &replaced.resource)
                        .await;
                    (index, result)
                });
            }
            let mut failed = false;
            while let Some((index, result)) = tasks.next().await {
                let name = &snapshot.replaced[index].name;
                match result {
                    Ok(()) => {
                        info!("Deleted the replaced '{}'", name);
                        deleted.insert(index);
                    }
                    Err(e) => {
                        error!("Unable to delete the replaced '{}': {}", name, e);
                        failed = true;
                        if let Some(replaced) = state.replaced.get_mut(index) {
                            replaced.resource.status = failed_status(ResourceAction::Delete, &e);
                        }
                        report.failures.push(Failure {
                            name: name.clone(),
                            action: ResourceAction::Delete,
                            error: e.message(),
                            error_resources: e.resources().into(),
                        });
                    }
                }
            }
            if failed {
                break;
            }
        }

        let mut index = 0;
        state.replaced.retain(|_| {
            let keep = !deleted.contains(&index);
            index += 1;
            keep
        });
        self.store.save(state).await?;
        Ok(())
    }

    async fn delete(
        &self,
        context: &ProviderContext,
        name: &str,
        recorded: &ResourceState,
    ) -> StepResult {
        match self.destroy_recorded(context, name, recorded).await {
            Ok(()) => StepResult::done(name, Operation::Delete, Record::Remove),
            Err(e) => StepResult::failed(
                name,
                Operation::Delete,
                ResourceAction::Delete,
                Record::Set(with_status(
                    recorded,
                    failed_status(ResourceAction::Delete, &e),
                )),
                &e,
            ),
        }
    }

    async fn destroy_recorded(
        &self,
        context: &ProviderContext,
        name: &str,
        recorded: &ResourceState,
    ) -> Result<(), ProviderError> {
        if let ResourceStatus::Failed {
            error_resources: ErrorResources::Orphaned,
            ..
        } = recorded.status
        {
            warn!(
                "'{}' left orphaned resources that cannot be destroyed, forgetting it",
                name
            );
            return Ok(());
        }
        info!("Deleting '{}' ({})", name, recorded.kind);
        let attributes = if recorded.is_failed_create() && recorded.attributes.is_empty() {
            None
        } else {
            Some(recorded.attributes.clone())
        };
        self.registry
            .get(&recorded.kind)?
            .destroy(context, name, Some(recorded.args.clone()), attributes)
            .await
    }
}
