//! Heartbeat tracker for tasks whose elapsed time the server measures.
//!
//! The client only keeps the session alive. Each heartbeat returns the
//! server's authoritative progress, which decides when the next one is due.

use crate::error::TrackerError;
use crate::scheduler::completion::Terminal;
use crate::scheduler::registry::TrackerStatus;
use crate::scheduler::tasks::TaskTarget;
use crate::tracker::{ProgressStrategy, Step, TrackerContext, saturating_secs};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// What to do after a heartbeat returned `progress`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeartbeatDecision {
    /// Keep the regular cadence.
    Continue(Duration),
    /// Send one last heartbeat after this delay, then the final report.
    FinalIn(Duration),
    /// Target reached; send the final report now.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatPlan {
    pub adjusted: f64,
    pub interval: Duration,
}

impl HeartbeatPlan {
    pub fn new(target: TaskTarget, interval: Duration) -> Self {
        Self {
            adjusted: target.adjusted,
            interval,
        }
    }

    pub fn decide(&self, progress: f64) -> HeartbeatDecision {
        let remaining = self.adjusted - progress;
        if remaining <= 0.0 {
            HeartbeatDecision::Complete
        } else if remaining < self.interval.as_secs_f64() {
            HeartbeatDecision::FinalIn(saturating_secs(remaining))
        } else {
            HeartbeatDecision::Continue(self.interval)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Heartbeating,
    FinalHeartbeat,
    FinalReport,
}

/// Heartbeat strategy.
#[derive(Debug)]
pub struct HeartbeatTracker {
    plan: HeartbeatPlan,
    phase: Phase,
    last_progress: f64,
}

impl HeartbeatTracker {
    pub fn new(plan: HeartbeatPlan) -> Self {
        Self {
            plan,
            phase: Phase::Heartbeating,
            last_progress: 0.0,
        }
    }

    /// Send one heartbeat. `Err` carries the step that ends the tracker.
    async fn heartbeat(&mut self, ctx: &TrackerContext) -> Result<f64, Step> {
        let result = ctx.report(None, false).await;
        if !ctx.is_active() {
            return Err(Step::Abandon);
        }
        match result {
            Ok(report) => match report.progress {
                Some(progress) => {
                    self.last_progress = self.last_progress.max(progress);
                    ctx.record_progress(progress);
                    Ok(progress)
                }
                None => Err(Step::Finish(Terminal::Failed(TrackerError::SessionRejected {
                    task_id: ctx.task_id().to_owned(),
                }))),
            },
            Err(e) => Err(Step::Finish(Terminal::Failed(e))),
        }
    }
}

#[async_trait]
impl ProgressStrategy for HeartbeatTracker {
    fn start_status(&self) -> TrackerStatus {
        TrackerStatus::Heartbeating
    }

    async fn tick(&mut self, ctx: &TrackerContext) -> Step {
        match self.phase {
            Phase::Heartbeating => {
                let sent_at = Instant::now();
                let progress = match self.heartbeat(ctx).await {
                    Ok(progress) => progress,
                    Err(step) => return step,
                };
                // Waits are measured from when the heartbeat was sent.
                let elapsed = sent_at.elapsed();
                match self.plan.decide(progress) {
                    HeartbeatDecision::Continue(delay) => Step::Wait(delay.saturating_sub(elapsed)),
                    HeartbeatDecision::FinalIn(delay) => {
                        debug!(
                            task_id = ctx.task_id(),
                            progress,
                            delay_ms = delay.as_millis() as u64,
                            "scheduling final heartbeat"
                        );
                        self.phase = Phase::FinalHeartbeat;
                        Step::Wait(delay.saturating_sub(elapsed))
                    }
                    HeartbeatDecision::Complete => {
                        self.phase = Phase::FinalReport;
                        Step::Wait(Duration::ZERO)
                    }
                }
            }
            Phase::FinalHeartbeat => {
                if let Err(step) = self.heartbeat(ctx).await {
                    return step;
                }
                self.phase = Phase::FinalReport;
                Step::Wait(Duration::ZERO)
            }
            Phase::FinalReport => {
                ctx.set_status(TrackerStatus::FinalReport);
                let result = ctx.report(None, true).await;
                if !ctx.is_active() {
                    return Step::Abandon;
                }
                match result {
                    Ok(report) => {
                        let progress = report
                            .progress
                            .unwrap_or(self.last_progress)
                            .max(self.last_progress);
                        ctx.record_progress(progress);
                        Step::Finish(Terminal::Completed { progress })
                    }
                    Err(e) => Step::Finish(Terminal::Failed(e)),
                }
            }
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
    use crate::scheduler::tasks::{Task, TaskKind};
    use chrono::Utc;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_secs(20);

    #[test]
    fn decide_thresholds() {
        let plan = HeartbeatPlan::new(TaskTarget::new(90.0, 100.0), INTERVAL);
        assert_eq!(plan.decide(0.0), HeartbeatDecision::Continue(INTERVAL));
        assert_eq!(plan.decide(80.0), HeartbeatDecision::Continue(INTERVAL));
        assert_eq!(
            plan.decide(95.0),
            HeartbeatDecision::FinalIn(Duration::from_secs(5))
        );
        assert_eq!(plan.decide(100.0), HeartbeatDecision::Complete);
        assert_eq!(plan.decide(130.0), HeartbeatDecision::Complete);
    }

    fn setup(task: &Task) -> (Arc<MockTaskClient>, TrackerContext, registry::SharedRegistry) {
        let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
        let registry = TaskRegistry::shared();
        registry::lock(&registry).set(TrackerState::new(task, Utc::now()));
        let dyn_client: Arc<dyn RemoteTaskClient> = client.clone();
        let ctx = TrackerContext::new(
            task.id.clone(),
            task.target,
            dyn_client,
            registry.clone(),
            ReportRetryPolicy::new(3, Duration::from_secs(2)),
        );
        (client, ctx, registry)
    }

    async fn run(tracker: &mut HeartbeatTracker, ctx: &TrackerContext) -> Step {
        loop {
            match tracker.tick(ctx).await {
                Step::Wait(delay) => tokio::time::sleep(delay).await,
                done => return done,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_b_final_heartbeat_after_remaining() {
        let task = Task::new("p", TaskKind::Heartbeat, TaskTarget::new(90.0, 100.0));
        let (client, ctx, _registry) = setup(&task);
        client.script_heartbeats("p", [Some(95.0), Some(100.0)]);

        let started = Instant::now();
        let mut tracker = HeartbeatTracker::new(HeartbeatPlan::new(task.target, INTERVAL));
        let step = run(&mut tracker, &ctx).await;
        assert!(matches!(
            step,
            Step::Finish(Terminal::Completed { progress }) if progress == 100.0
        ));

        let calls = client.reports_for("p");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].at - started, Duration::ZERO);
        assert_eq!(calls[1].at - started, Duration::from_secs(5));
        assert!(!calls[1].is_final);
        assert!(calls[2].is_final);
        assert_eq!(calls[2].value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_never_spaced_beyond_interval() {
        let task = Task::new("p", TaskKind::Heartbeat, TaskTarget::new(100.0, 100.0));
        let (client, ctx, _registry) = setup(&task);
        client.script_heartbeats(
            "p",
            [Some(0.0), Some(20.0), Some(40.0), Some(60.0), Some(80.0), Some(100.0)],
        );
        client.set_report_latency(Duration::from_secs(3));

        let mut tracker = HeartbeatTracker::new(HeartbeatPlan::new(task.target, INTERVAL));
        let step = run(&mut tracker, &ctx).await;
        assert!(matches!(step, Step::Finish(Terminal::Completed { .. })));

        let beats: Vec<_> = client
            .reports_for("p")
            .into_iter()
            .filter(|call| !call.is_final)
            .collect();
        assert_eq!(beats.len(), 6);
        for pair in beats.windows(2) {
            assert!(pair[1].at - pair[0].at <= INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_d_null_progress_rejects_session() {
        let task = Task::new("p", TaskKind::Heartbeat, TaskTarget::new(900.0, 930.0));
        let (client, ctx, _registry) = setup(&task);
        client.script_heartbeats("p", [Some(10.0), None]);

        let mut tracker = HeartbeatTracker::new(HeartbeatPlan::new(task.target, INTERVAL));
        let step = run(&mut tracker, &ctx).await;
        assert!(matches!(
            step,
            Step::Finish(Terminal::Failed(TrackerError::SessionRejected { .. }))
        ));
        assert!(client.final_reports("p").is_empty());
    }
}
