//! Terminal transitions and tracker events.
//!
//! Every way a tracker can end (completion, failure, cancellation) funnels
//! through [`CompletionDetector::finish`], which performs the single
//! registry removal and emits at most one event.

use crate::error::TrackerError;
use crate::scheduler::registry::{self, SharedRegistry};
use crate::scheduler::resume::{self, SharedResumeStore};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events published to observers (UI tiles, notifications, the host bridge).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Render-timer tick of the UI counter.
    Progress { task_id: String, value: f64 },
    /// The final report succeeded.
    Completed { task_id: String, progress: f64 },
    /// The tracker failed and was removed.
    Failed { task_id: String, reason: String },
    /// The tracker was cancelled and was removed.
    Stopped { task_id: String, reason: CancelReason },
}

/// Why a tracker was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit request from the user or host.
    User,
    /// The application bound to the task exited.
    ActivityStopped,
    /// The process is shutting down; the tracker resumes on next start.
    Shutdown,
    /// Tracking was switched off.
    Disabled,
}

impl CancelReason {
    /// Only shutdown keeps the task in the resume list.
    pub fn keeps_resume_entry(self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::User => "cancelled by user",
            Self::ActivityStopped => "application exited",
            Self::Shutdown => "shutting down",
            Self::Disabled => "tracking disabled",
        };
        f.write_str(label)
    }
}

/// How a tracker ended.
#[derive(Debug)]
pub enum Terminal {
    Completed { progress: f64 },
    Failed(TrackerError),
    Cancelled(CancelReason),
}

/// Performs tracker teardown.
#[derive(Clone)]
pub struct CompletionDetector {
    registry: SharedRegistry,
    resume: SharedResumeStore,
    events: broadcast::Sender<TrackerEvent>,
}

impl CompletionDetector {
    pub fn new(
        registry: SharedRegistry,
        resume: SharedResumeStore,
        events: broadcast::Sender<TrackerEvent>,
    ) -> Self {
        Self {
            registry,
            resume,
            events,
        }
    }

    /// Tear down the tracker for `task_id`.
    ///
    /// Returns `false` and does nothing if the tracker was already removed.
    pub fn finish(&self, task_id: &str, terminal: Terminal) -> bool {
        let removed = registry::lock(&self.registry).delete(task_id);
        let Some(mut state) = removed else {
            debug!(task_id, ?terminal, "tracker already torn down");
            return false;
        };
        state.clear_timers();
        drop(state);

        let keep_entry =
            matches!(terminal, Terminal::Cancelled(reason) if reason.keeps_resume_entry());
        if !keep_entry {
            resume::lock_store(&self.resume).remove(task_id);
        }

        let event = match terminal {
            Terminal::Completed { progress } => {
                info!(task_id, progress, "task completed");
                TrackerEvent::Completed {
                    task_id: task_id.to_owned(),
                    progress,
                }
            }
            Terminal::Failed(e) => {
                warn!(task_id, error = %e, "tracker failed");
                TrackerEvent::Failed {
                    task_id: task_id.to_owned(),
                    reason: e.to_string(),
                }
            }
            Terminal::Cancelled(reason) => {
                info!(task_id, %reason, "tracker stopped");
                TrackerEvent::Stopped {
                    task_id: task_id.to_owned(),
                    reason,
                }
            }
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
        true
    }
}
