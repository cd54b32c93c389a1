/*!

A mock cloud with a single resource kind, "instance", so that the engine can be tested without a
cloud account. Every call is logged, and creation can be made to fail for chosen logical names.

!*/

use resource_provider::{
    Create, Destroy, IntoProviderError, MemoryStateStore, Previous, ProviderError,
    ProviderResult, Request, Resources, StateStore, StoreError, StoreResult, Teardown, Update,
};
use serde::{Deserialize, Serialize};
use stack_model::{Configuration, ResourceKind, StackState};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceArgs {
    pub size: u32,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Configuration for InstanceArgs {}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAttributes {
    pub id: String,
    pub size: u32,
}

impl Configuration for InstanceAttributes {}

pub struct Instance;

impl ResourceKind for Instance {
    const TYPE: &'static str = "mock:instance";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &["/zone"];
    type Args = InstanceArgs;
    type Attributes = InstanceAttributes;

    fn validate(args: &InstanceArgs) -> Result<(), String> {
        if args.size == 0 {
            return Err("size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CloudState {
    next_id: u64,
    pub instances: BTreeMap<String, InstanceArgs>,
    pub log: Vec<String>,
    pub fail_create: BTreeSet<String>,
    pub fail_update: BTreeSet<String>,
    pub fail_destroy: BTreeSet<String>,
}

/// A handle to the shared mock cloud.
#[derive(Clone, Debug, Default)]
pub struct Cloud(Arc<Mutex<CloudState>>);

impl Cloud {
    pub fn log(&self) -> Vec<String> {
        self.0.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.0.lock().unwrap().log.clear();
    }

    pub fn instance_count(&self) -> usize {
        self.0.lock().unwrap().instances.len()
    }

    pub fn fail_create(&self, name: &str, fail: bool) {
        let mut state = self.0.lock().unwrap();
        if fail {
            state.fail_create.insert(name.to_string());
        } else {
            state.fail_create.remove(name);
        }
    }

    pub fn fail_update(&self, name: &str, fail: bool) {
        let mut state = self.0.lock().unwrap();
        if fail {
            state.fail_update.insert(name.to_string());
        } else {
            state.fail_update.remove(name);
        }
    }

    pub fn fail_destroy(&self, name: &str, fail: bool) {
        let mut state = self.0.lock().unwrap();
        if fail {
            state.fail_destroy.insert(name.to_string());
        } else {
            state.fail_destroy.remove(name);
        }
    }
}

pub struct InstanceProvider {
    pub cloud: Cloud,
}

#[async_trait::async_trait]
impl Create for InstanceProvider {
    type Kind = Instance;

    async fn create(&self, request: Request<'_, Instance>) -> ProviderResult<InstanceAttributes> {
        let mut state = self.cloud.0.lock().unwrap();
        state.log.push(format!("create {}", request.name));
        if state.fail_create.contains(request.name) {
            return Err(ProviderError::new_with_context(
                Resources::Clear,
                format!("Quota exceeded creating '{}'", request.name),
            ));
        }
        state.next_id += 1;
        let id = format!("i-{}-{}", request.name, state.next_id);
        state.instances.insert(id.clone(), request.args.clone());
        Ok(InstanceAttributes {
            id,
            size: request.args.size,
        })
    }
}

#[async_trait::async_trait]
impl Update for InstanceProvider {
    async fn update(
        &self,
        request: Request<'_, Instance>,
        previous: Previous<Instance>,
    ) -> ProviderResult<InstanceAttributes> {
        let mut state = self.cloud.0.lock().unwrap();
        state.log.push(format!("update {}", request.name));
        if state.fail_update.contains(request.name) {
            return Err(ProviderError::new_with_context(
                Resources::Remaining,
                format!("Throttled updating '{}'", request.name),
            ));
        }
        let instance = state
            .instances
            .get_mut(&previous.attributes.id)
            .context(Resources::Clear, "Instance does not exist")?;
        *instance = request.args.clone();
        Ok(InstanceAttributes {
            id: previous.attributes.id,
            size: request.args.size,
        })
    }
}

#[async_trait::async_trait]
impl Destroy for InstanceProvider {
    async fn destroy(&self, teardown: Teardown<'_, Instance>) -> ProviderResult<()> {
        let mut state = self.cloud.0.lock().unwrap();
        state.log.push(format!("destroy {}", teardown.name));
        if state.fail_destroy.contains(teardown.name) {
            return Err(ProviderError::new_with_context(
                Resources::Remaining,
                "Instance is still in use",
            ));
        }
        if let Some(attributes) = teardown.attributes {
            let in_use = state
                .instances
                .values()
                .any(|instance| instance.parent_id.as_deref() == Some(attributes.id.as_str()));
            if in_use {
                return Err(ProviderError::new_with_context(
                    Resources::Remaining,
                    format!("Instance '{}' has dependent instances", attributes.id),
                ));
            }
            state.instances.remove(&attributes.id);
        }
        Ok(())
    }
}

/// A [`MemoryStateStore`] whose next few saves can be made to fail, like a full disk.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStateStore,
    failures: Mutex<usize>,
}

impl FlakyStore {
    pub fn fail_saves(&self, count: usize) {
        *self.failures.lock().unwrap() = count;
    }
}

#[async_trait::async_trait]
impl StateStore for FlakyStore {
    async fn load(&self) -> StoreResult<StackState> {
        self.inner.load().await
    }

    async fn save(&self, state: &StackState) -> StoreResult<()> {
        let fail = {
            let mut failures = self.failures.lock().unwrap();
            let fail = *failures > 0;
            *failures = failures.saturating_sub(1);
            fail
        };
        if fail {
            return Err(StoreError::Write {
                path: PathBuf::from("state.json"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "No space left on device"),
            });
        }
        self.inner.save(state).await
    }
}
