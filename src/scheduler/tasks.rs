//! Remote task definitions.
//!
//! A [`Task`] is owned by the remote service and read-only to the scheduler.
//! Its [`TaskKind`] decides which progress strategy tracks it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How progress is measured for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Progress is not observable; elapsed time is simulated and reported.
    SimulatedVideo,
    /// The server tracks elapsed time; the client keeps the session alive.
    Heartbeat,
    /// Completes with a single final report.
    Instantaneous,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimulatedVideo => write!(f, "simulated-video"),
            Self::Heartbeat => write!(f, "heartbeat"),
            Self::Instantaneous => write!(f, "instantaneous"),
        }
    }
}

/// Completion target in seconds of progress.
///
/// `raw` is the value the remote API expects; `adjusted` adds a leeway
/// margin for client/server timing drift. `adjusted >= raw` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "TargetRepr")]
pub struct TaskTarget {
    /// Target the remote API expects.
    pub raw: f64,
    /// Raw target plus leeway.
    pub adjusted: f64,
}

#[derive(Deserialize)]
struct TargetRepr {
    raw: f64,
    adjusted: Option<f64>,
}

impl From<TargetRepr> for TaskTarget {
    fn from(repr: TargetRepr) -> Self {
        Self::new(repr.raw, repr.adjusted.unwrap_or(repr.raw))
    }
}

impl TaskTarget {
    /// Create a target, raising `adjusted` to `raw` if it is smaller.
    pub fn new(raw: f64, adjusted: f64) -> Self {
        let raw = raw.max(0.0);
        Self {
            raw,
            adjusted: adjusted.max(raw),
        }
    }

    /// Create a target with `adjusted = raw + leeway`.
    pub fn with_leeway(raw: f64, leeway: f64) -> Self {
        Self::new(raw, raw + leeway.max(0.0))
    }

    /// Margin between the adjusted and raw targets.
    pub fn leeway(&self) -> f64 {
        self.adjusted - self.raw
    }
}

/// A trackable unit of work as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque task identifier.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// How progress is measured.
    pub kind: TaskKind,
    /// Completion target.
    pub target: TaskTarget,
    /// External application whose process bounds a heartbeat session.
    #[serde(default)]
    pub application_id: Option<String>,
    /// Last progress value known to the remote service.
    #[serde(default)]
    pub progress: Option<f64>,
    /// When the user enrolled, if they have.
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
    /// When the task was completed, if it was.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the task stops accepting progress.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create an unenrolled task.
    pub fn new(id: impl Into<String>, kind: TaskKind, target: TaskTarget) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            target,
            application_id: None,
            progress: None,
            enrolled_at: None,
            completed_at: None,
            expires_at: None,
        }
    }

    /// Set the enrollment timestamp.
    pub fn enrolled(mut self, at: DateTime<Utc>) -> Self {
        self.enrolled_at = Some(at);
        self
    }

    /// Set the associated application.
    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Set the last remote-known progress.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_enrolled(&self) -> bool {
        self.enrolled_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns `true` once `expires_at` has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether a tracker may be re-attached after a restart.
    pub fn is_resumable(&self, now: DateTime<Utc>) -> bool {
        self.is_enrolled() && !self.is_completed() && !self.is_expired(now)
    }

    /// Seconds elapsed since enrollment, or `None` when not enrolled.
    pub fn secs_since_enrollment(&self, now: DateTime<Utc>) -> Option<f64> {
        self.enrolled_at.map(|at| {
            let millis = now.signed_duration_since(at).num_milliseconds().max(0);
            millis as f64 / 1000.0
        })
    }
}
