use async_trait::async_trait;
use log::trace;
use snafu::{ResultExt, Snafu};
use stack_model::StackState;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Unable to read state file '{}': {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse state file '{}': {}", path.display(), source))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to serialize the stack state: {}", source))]
    Serialize { source: serde_json::Error },

    #[snafu(display("Unable to write state file '{}': {}", path.display(), source))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Where the engine keeps the recorded [`StackState`] between runs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the recorded state. A store that has never been written holds the empty state.
    async fn load(&self) -> StoreResult<StackState>;

    async fn save(&self, state: &StackState) -> StoreResult<()>;
}

/// Keeps the state as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> StoreResult<StackState> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("No state file at '{}'", self.path.display());
                return Ok(StackState::default());
            }
            Err(e) => return Err(e).context(ReadSnafu { path: &self.path }),
        };
        serde_json::from_slice(&data).context(ParseSnafu { path: &self.path })
    }

    async fn save(&self, state: &StackState) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(state).context(SerializeSnafu)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context(WriteSnafu { path: parent })?;
        }
        // Write next to the target and rename so that an interrupted save never leaves a
        // truncated state file.
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        tokio::fs::write(&temp, data)
            .await
            .context(WriteSnafu { path: &temp })?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .context(WriteSnafu { path: &self.path })?;
        trace!("Saved state to '{}'", self.path.display());
        Ok(())
    }
}

/// Keeps the state in memory. Used by tests and by previews that must not write anything.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<StackState>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StackState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    pub async fn snapshot(&self) -> StackState {
        self.state.lock().await.clone()
    }

    /// How many times the state has been saved.
    pub async fn saves(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> StoreResult<StackState> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &StackState) -> StoreResult<()> {
        *self.state.lock().await = state.clone();
        *self.saves.lock().await += 1;
        Ok(())
    }
}

#[async_trait]
impl<S> StateStore for std::sync::Arc<S>
where
    S: StateStore + ?Sized,
{
    async fn load(&self) -> StoreResult<StackState> {
        self.as_ref().load().await
    }

    async fn save(&self, state: &StackState) -> StoreResult<()> {
        self.as_ref().save(state).await
    }
}

#[cfg(test)]
mod test {
    use super::{FileStateStore, StateStore};
    use serde_json::json;
    use stack_model::{ResourceState, ResourceStatus, StackState};

    #[tokio::test]
    async fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saved_state_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state.json"));
        let mut state = StackState::default();
        state.resources.insert(
            "eks-role-1747".to_string(),
            ResourceState {
                kind: "aws:iam:Role".to_string(),
                args: json!({"roleName": "eks-role-1747"}),
                attributes: Default::default(),
                dependencies: Default::default(),
                status: ResourceStatus::Created,
            },
        );
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), state);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileStateStore::new(&path).load().await.unwrap_err();
        assert!(err.to_string().contains("Unable to parse"));
    }
}
