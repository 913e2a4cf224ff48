//! Remote task API contract.
//!
//! The scheduler only talks to the remote service through
//! [`RemoteTaskClient`]. [`http::HttpTaskClient`] speaks the JSON API;
//! [`mock::MockTaskClient`] scripts it for tests and offline runs.

pub mod http;
pub mod mock;

use crate::error::Result;
use crate::scheduler::tasks::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpTaskClient;
pub use mock::MockTaskClient;

/// Response to a progress report.
///
/// Heartbeat reports carry the server's authoritative progress; a heartbeat
/// answered without one means the server no longer recognises the session.
/// Other reports may be acknowledged with no progress at all.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub progress: Option<f64>,
}

/// Remote task service. Every call may fail; callers retry.
#[async_trait]
pub trait RemoteTaskClient: Send + Sync {
    /// Register the user's participation in a task.
    async fn enroll(&self, task_id: &str) -> Result<()>;

    /// Report progress.
    ///
    /// `value` is `None` for heartbeats, which let the server measure time.
    async fn report_progress(
        &self,
        task_id: &str,
        value: Option<f64>,
        is_final: bool,
    ) -> Result<ProgressReport>;

    /// Fetch the current task record, or `None` if it no longer exists.
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;
}
