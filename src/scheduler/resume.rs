//! Persisted resume list and the startup resumption sweep.
//!
//! Only task ids are persisted. On startup the ids are re-validated against
//! the remote service; anything that vanished, completed, or expired is
//! dropped without surfacing an error.

use crate::client::RemoteTaskClient;
use crate::error::{Result, TrackerError};
use crate::scheduler::clock::Clock;
use crate::scheduler::tasks::{Task, TaskKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Ids of tasks that should be re-attached after a restart, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeList {
    /// Heartbeat tasks.
    #[serde(default)]
    pub play: Vec<String>,
    /// Simulated video tasks.
    #[serde(default, alias = "video")]
    pub watch: Vec<String>,
    /// Instantaneous tasks.
    #[serde(default)]
    pub achievement: Vec<String>,
}

impl ResumeList {
    fn bucket_mut(&mut self, kind: TaskKind) -> &mut Vec<String> {
        match kind {
            TaskKind::Heartbeat => &mut self.play,
            TaskKind::SimulatedVideo => &mut self.watch,
            TaskKind::Instantaneous => &mut self.achievement,
        }
    }

    /// Add `task_id` under `kind`. Returns `false` if it was already listed.
    pub fn insert(&mut self, task_id: &str, kind: TaskKind) -> bool {
        if self.contains(task_id) {
            return false;
        }
        self.bucket_mut(kind).push(task_id.to_owned());
        true
    }

    /// Remove `task_id` from every bucket. Returns `true` if anything was removed.
    pub fn remove(&mut self, task_id: &str) -> bool {
        let before = self.len();
        for bucket in [&mut self.play, &mut self.watch, &mut self.achievement] {
            bucket.retain(|id| id != task_id);
        }
        self.len() != before
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries().any(|(id, _)| id == task_id)
    }

    /// All `(id, kind)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, TaskKind)> {
        let play = self.play.iter().map(|id| (id.as_str(), TaskKind::Heartbeat));
        let watch = self
            .watch
            .iter()
            .map(|id| (id.as_str(), TaskKind::SimulatedVideo));
        let achievement = self
            .achievement
            .iter()
            .map(|id| (id.as_str(), TaskKind::Instantaneous));
        play.chain(watch).chain(achievement)
    }

    pub fn len(&self) -> usize {
        self.play.len() + self.watch.len() + self.achievement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ResumeState {
    /// Schema version.
    #[serde(default = "default_state_version")]
    version: u8,
    #[serde(flatten)]
    list: ResumeList,
}

fn default_state_version() -> u8 {
    1
}

fn load_list_from_path(path: Option<&Path>) -> Result<ResumeList> {
    let Some(path) = path else {
        return Ok(ResumeList::default());
    };

    let bytes = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ResumeList::default());
        }
        Err(e) => {
            return Err(TrackerError::Persist(format!("cannot read resume list: {e}")));
        }
    };

    let state: ResumeState = serde_json::from_slice(&bytes)
        .map_err(|e| TrackerError::Persist(format!("cannot parse resume list: {e}")))?;
    Ok(state.list)
}

fn save_list_to_path(path: Option<&Path>, list: &ResumeList) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| TrackerError::Persist(format!("cannot create resume dir: {e}")))?;
    }

    let state = ResumeState {
        version: default_state_version(),
        list: list.clone(),
    };
    let json = serde_json::to_string_pretty(&state)
        .map_err(|e| TrackerError::Persist(format!("cannot serialize resume list: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| TrackerError::Persist(format!("cannot write resume list: {e}")))?;
    Ok(())
}

/// Resume list plus the file it is mirrored to.
///
/// Every mutation writes through. Write failures are logged and the
/// in-memory list stays authoritative for the rest of the process.
#[derive(Debug, Default)]
pub struct ResumeStore {
    path: Option<PathBuf>,
    list: ResumeList,
}

/// Resume store shared between the scheduler and the completion detector.
pub type SharedResumeStore = Arc<Mutex<ResumeStore>>;

pub(crate) fn lock_store(store: &SharedResumeStore) -> MutexGuard<'_, ResumeStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResumeStore {
    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the store at `path`, loading any existing list.
    ///
    /// A missing file yields an empty list; an unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let list = load_list_from_path(Some(&path))?;
        Ok(Self {
            path: Some(path),
            list,
        })
    }

    /// Open the store, falling back to an empty list if the file is corrupt.
    pub fn open_or_empty(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let list = load_list_from_path(Some(&path)).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "discarding unreadable resume list");
            ResumeList::default()
        });
        Self {
            path: Some(path),
            list,
        }
    }

    pub fn shared(self) -> SharedResumeStore {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn list(&self) -> &ResumeList {
        &self.list
    }

    pub fn add(&mut self, task_id: &str, kind: TaskKind) {
        if self.list.insert(task_id, kind) {
            self.persist();
        }
    }

    pub fn remove(&mut self, task_id: &str) {
        if self.list.remove(task_id) {
            self.persist();
        }
    }

    /// Replace the whole list and write it out.
    pub fn replace(&mut self, list: ResumeList) {
        self.list = list;
        self.persist();
    }

    pub fn clear(&mut self) {
        self.replace(ResumeList::default());
    }

    fn persist(&self) {
        if let Err(e) = save_list_to_path(self.path.as_deref(), &self.list) {
            warn!(error = %e, "failed to persist resume list");
        }
    }
}

/// Re-validates persisted ids against the remote service.
pub struct ResumptionManager {
    client: Arc<dyn RemoteTaskClient>,
    clock: Arc<dyn Clock>,
}

impl ResumptionManager {
    pub fn new(client: Arc<dyn RemoteTaskClient>, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    /// Look up every persisted id and return the tasks that can be resumed.
    ///
    /// Missing, finished, expired, or unreachable tasks are dropped.
    pub async fn collect(&self, persisted: &ResumeList) -> Vec<Task> {
        let ids: Vec<(String, TaskKind)> = persisted
            .entries()
            .map(|(id, kind)| (id.to_owned(), kind))
            .collect();

        let mut resumable = Vec::with_capacity(ids.len());
        for (task_id, kind) in ids {
            match self.client.get_task(&task_id).await {
                Ok(Some(task)) if task.is_resumable(self.clock.now()) => {
                    if task.kind != kind {
                        debug!(
                            task_id = %task_id,
                            persisted = %kind,
                            live = %task.kind,
                            "task kind changed since persisted"
                        );
                    }
                    resumable.push(task);
                }
                Ok(Some(_)) => {
                    debug!(task_id = %task_id, "dropping finished or expired task");
                }
                Ok(None) => {
                    let vanished = TrackerError::TaskVanished {
                        task_id: task_id.clone(),
                    };
                    debug!(task_id = %task_id, reason = %vanished, "dropping resume entry");
                }
                Err(e) => {
                    debug!(task_id = %task_id, error = %e, "dropping unreachable resume entry");
                }
            }
        }
        resumable
    }
}
