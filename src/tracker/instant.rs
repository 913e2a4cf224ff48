//! Tracker for tasks that complete with a single final report.

use crate::scheduler::completion::Terminal;
use crate::scheduler::registry::TrackerStatus;
use crate::tracker::{ProgressStrategy, Step, TrackerContext};
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct InstantTracker;

#[async_trait]
impl ProgressStrategy for InstantTracker {
    fn start_status(&self) -> TrackerStatus {
        TrackerStatus::FinalReport
    }

    async fn tick(&mut self, ctx: &TrackerContext) -> Step {
        let raw = ctx.target().raw;
        let result = ctx.report(Some(raw), true).await;
        if !ctx.is_active() {
            return Step::Abandon;
        }
        match result {
            Ok(_) => {
                ctx.record_progress(raw);
                Step::Finish(Terminal::Completed { progress: raw })
            }
            Err(e) => Step::Finish(Terminal::Failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::client::RemoteTaskClient;
    use crate::client::mock::MockTaskClient;
    use crate::scheduler::registry::{self, TaskRegistry, TrackerState};
    use crate::scheduler::retry::ReportRetryPolicy;
    use crate::scheduler::tasks::{Task, TaskKind, TaskTarget};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn single_final_report() {
        let task = Task::new("a", TaskKind::Instantaneous, TaskTarget::new(1.0, 1.0));
        let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
        let registry = TaskRegistry::shared();
        registry::lock(&registry).set(TrackerState::new(&task, Utc::now()));
        let dyn_client: Arc<dyn RemoteTaskClient> = client.clone();
        let ctx = TrackerContext::new(
            "a",
            task.target,
            dyn_client,
            registry,
            ReportRetryPolicy::new(3, Duration::from_secs(1)),
        );

        client.fail_next_reports("a", 1);
        let step = InstantTracker.tick(&ctx).await;
        assert!(matches!(step, Step::Finish(Terminal::Completed { progress }) if progress == 1.0));
        assert_eq!(client.reports_for("a").len(), 2);
        assert_eq!(client.final_reports("a").len(), 1);
    }
}
