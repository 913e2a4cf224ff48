//! Registry of active trackers, keyed by task id.
//!
//! The registry is the only shared mutable state in the scheduler. It holds
//! at most one [`TrackerState`] per task id: [`TaskRegistry::set`] refuses to
//! overwrite, and every tracker re-checks [`TaskRegistry::has`] after each
//! suspension point. The lock guarding it is never held across an `.await`.

use crate::scheduler::tasks::{Task, TaskKind, TaskTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Registry shared between the scheduler and its trackers.
pub type SharedRegistry = Arc<Mutex<TaskRegistry>>;

/// Lock the shared registry, recovering from a poisoned lock.
pub(crate) fn lock(registry: &SharedRegistry) -> MutexGuard<'_, TaskRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where a tracker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Created,
    WaitingForEnrollment,
    /// Simulated tracker ramping towards its target.
    Accelerating,
    /// Heartbeat tracker keeping the session alive.
    Heartbeating,
    FinalReport,
    Completed,
    Failed,
}

impl TrackerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::WaitingForEnrollment => "waiting for enrollment",
            Self::Accelerating => "accelerating",
            Self::Heartbeating => "heartbeating",
            Self::FinalReport => "final report",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Live state of one tracker.
///
/// Owns the tracker's cancellation token and timer handles. Dropping the
/// state (or calling [`clear_timers`](Self::clear_timers)) stops both timers.
#[derive(Debug)]
pub struct TrackerState {
    task_id: String,
    kind: TaskKind,
    target: TaskTarget,
    application_id: Option<String>,
    progress: f64,
    display_progress: f64,
    status: TrackerStatus,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    progress_timer: Option<AbortHandle>,
    render_timer: Option<AbortHandle>,
}

impl TrackerState {
    /// Create a fresh `Created` state for `task`.
    pub fn new(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            kind: task.kind,
            target: task.target,
            application_id: task.application_id.clone(),
            progress: 0.0,
            display_progress: 0.0,
            status: TrackerStatus::Created,
            started_at: now,
            cancel: CancellationToken::new(),
            progress_timer: None,
            render_timer: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn display_progress(&self) -> f64 {
        self.display_progress
    }

    /// Token cancelled when the tracker is torn down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the tracker and abort both timers.
    pub fn clear_timers(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.progress_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.render_timer.take() {
            handle.abort();
        }
    }

    /// Copy of the observable fields.
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            task_id: self.task_id.clone(),
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            display_progress: self.display_progress,
            started_at: self.started_at,
        }
    }
}

impl Drop for TrackerState {
    fn drop(&mut self) {
        self.clear_timers();
    }
}

/// Read-only view of a tracker, safe to hand to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TrackerStatus,
    pub progress: f64,
    pub display_progress: f64,
    pub started_at: DateTime<Utc>,
}

/// Map from task id to tracker state.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    trackers: HashMap<String, TrackerState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a new registry for sharing.
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn has(&self, task_id: &str) -> bool {
        self.trackers.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<TrackerSnapshot> {
        self.trackers.get(task_id).map(TrackerState::snapshot)
    }

    /// Insert `state`. Returns `false` without touching the existing entry
    /// when a tracker for the same id is already registered.
    pub fn set(&mut self, state: TrackerState) -> bool {
        if self.trackers.contains_key(&state.task_id) {
            return false;
        }
        self.trackers.insert(state.task_id.clone(), state);
        true
    }

    /// Remove and return the state for `task_id`. Absent ids are a no-op.
    pub fn delete(&mut self, task_id: &str) -> Option<TrackerState> {
        self.trackers.remove(task_id)
    }

    /// Snapshot of all registered ids.
    pub fn ids(&self) -> Vec<String> {
        self.trackers.keys().cloned().collect()
    }

    /// Ids of trackers bound to `application_id`.
    pub fn ids_for_application(&self, application_id: &str) -> Vec<String> {
        self.trackers
            .values()
            .filter(|state| state.application_id.as_deref() == Some(application_id))
            .map(|state| state.task_id.clone())
            .collect()
    }

    pub fn snapshots(&self) -> Vec<TrackerSnapshot> {
        self.trackers.values().map(TrackerState::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Returns `false` if the tracker is gone.
    pub fn set_status(&mut self, task_id: &str, status: TrackerStatus) -> bool {
        match self.trackers.get_mut(task_id) {
            Some(state) => {
                state.status = status;
                true
            }
            None => false,
        }
    }

    /// Raise the tracker's progress to `value`. Progress never decreases.
    ///
    /// Returns the resulting progress, or `None` if the tracker is gone.
    pub fn record_progress(&mut self, task_id: &str, value: f64) -> Option<f64> {
        let state = self.trackers.get_mut(task_id)?;
        if value > state.progress {
            state.progress = value;
        }
        if state.display_progress < state.progress {
            state.display_progress = state.progress;
        }
        Some(state.progress)
    }

    /// Advance the UI counter by `step`, capped at the raw target.
    ///
    /// Returns `None` once the tracker has been removed, which stops the
    /// render timer.
    pub fn advance_display(&mut self, task_id: &str, step: f64) -> Option<f64> {
        let state = self.trackers.get_mut(task_id)?;
        let next = (state.display_progress + step).min(state.target.raw);
        state.display_progress = next.max(state.progress.min(state.target.raw));
        Some(state.display_progress)
    }

    /// Returns `false` if the tracker is gone.
    pub fn attach_progress_timer(&mut self, task_id: &str, handle: AbortHandle) -> bool {
        match self.trackers.get_mut(task_id) {
            Some(state) => {
                state.progress_timer = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the tracker is gone.
    pub fn attach_render_timer(&mut self, task_id: &str, handle: AbortHandle) -> bool {
        match self.trackers.get_mut(task_id) {
            Some(state) => {
                if let Some(previous) = state.render_timer.replace(handle) {
                    previous.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Take the progress timer handle without aborting it.
    ///
    /// A tracker's driver calls this on itself before teardown so the
    /// teardown does not abort the task that is running it.
    pub fn detach_progress_timer(&mut self, task_id: &str) -> Option<AbortHandle> {
        self.trackers
            .get_mut(task_id)
            .and_then(|state| state.progress_timer.take())
    }
}
