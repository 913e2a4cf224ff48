//! Per-task progress trackers.
//!
//! A tracker is one spawned driver task that waits for enrollment and then
//! repeatedly calls its [`ProgressStrategy`] until the strategy finishes or
//! the tracker is cancelled. Strategies are plain state machines; all
//! waiting happens in [`drive`] so cancellation is handled in one place.

pub mod heartbeat;
pub mod instant;
pub mod simulated;

use crate::client::{ProgressReport, RemoteTaskClient};
use crate::config::SchedulerConfig;
use crate::error::{Result, TrackerError};
use crate::scheduler::clock::Clock;
use crate::scheduler::completion::{CompletionDetector, Terminal, TrackerEvent};
use crate::scheduler::enrollment::wait_for_enrollment;
use crate::scheduler::registry::{self, SharedRegistry, TrackerStatus};
use crate::scheduler::retry::{ReportRetryPolicy, report_with_retry};
use crate::scheduler::tasks::{Task, TaskKind, TaskTarget};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub use heartbeat::{HeartbeatDecision, HeartbeatPlan, HeartbeatTracker};
pub use instant::InstantTracker;
pub use simulated::{SimulatedPlan, SimulatedTracker};

/// What the driver should do after a tick.
#[derive(Debug)]
pub enum Step {
    /// Sleep, then tick again.
    Wait(Duration),
    /// Tear the tracker down with this outcome.
    Finish(Terminal),
    /// The tracker was removed by someone else; exit without teardown.
    Abandon,
}

/// Progress algorithm for one task kind.
#[async_trait]
pub trait ProgressStrategy: Send {
    /// Status the tracker enters once enrolled.
    fn start_status(&self) -> TrackerStatus;

    /// Perform whatever is due now and say what comes next.
    async fn tick(&mut self, ctx: &TrackerContext) -> Step;
}

/// Timing knobs shared by every tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerTimings {
    pub report_every: Duration,
    pub heartbeat_interval: Duration,
    pub render_tick: Duration,
    pub enrollment_timeout: Duration,
    pub enrollment_poll: Duration,
    pub retry: ReportRetryPolicy,
}

impl Default for TrackerTimings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl TrackerTimings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            report_every: config.tracker.report_every(),
            heartbeat_interval: config.tracker.heartbeat_interval(),
            render_tick: config.tracker.render_tick(),
            enrollment_timeout: config.enrollment.timeout(),
            enrollment_poll: config.enrollment.poll_interval(),
            retry: config.retry.policy(),
        }
    }
}

/// Handle a strategy uses to talk to the outside world.
pub struct TrackerContext {
    task_id: String,
    target: TaskTarget,
    client: Arc<dyn RemoteTaskClient>,
    registry: SharedRegistry,
    retry: ReportRetryPolicy,
}

impl TrackerContext {
    pub fn new(
        task_id: impl Into<String>,
        target: TaskTarget,
        client: Arc<dyn RemoteTaskClient>,
        registry: SharedRegistry,
        retry: ReportRetryPolicy,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            target,
            client,
            registry,
            retry,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn target(&self) -> TaskTarget {
        self.target
    }

    /// Whether this tracker is still registered.
    pub fn is_active(&self) -> bool {
        registry::lock(&self.registry).has(&self.task_id)
    }

    pub fn set_status(&self, status: TrackerStatus) -> bool {
        registry::lock(&self.registry).set_status(&self.task_id, status)
    }

    pub fn record_progress(&self, value: f64) -> Option<f64> {
        registry::lock(&self.registry).record_progress(&self.task_id, value)
    }

    /// Report progress with the configured retry policy.
    pub async fn report(&self, value: Option<f64>, is_final: bool) -> Result<ProgressReport> {
        report_with_retry(
            self.client.as_ref(),
            self.retry,
            &self.task_id,
            value,
            is_final,
        )
        .await
    }
}

/// Convert seconds to a [`Duration`], saturating at [`Duration::MAX`].
///
/// Targets arrive as arbitrary finite floats, so the result may exceed what
/// `Duration::from_secs_f64` accepts.
pub(crate) fn saturating_secs(secs: f64) -> Duration {
    if secs <= 0.0 || secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Starting progress for a freshly enrolled task.
///
/// Simulated tasks start at the seconds elapsed since enrollment (never
/// below the remote-known progress), clamped to `[1, adjusted]`. Heartbeat
/// tasks start at the remote-known progress.
pub fn initial_progress(task: &Task, now: DateTime<Utc>) -> f64 {
    match task.kind {
        TaskKind::SimulatedVideo => {
            let known = task.progress.unwrap_or(0.0);
            let elapsed = task.secs_since_enrollment(now).unwrap_or(1.0);
            elapsed.max(known).max(1.0).min(task.target.adjusted)
        }
        TaskKind::Heartbeat => task.progress.unwrap_or(0.0).max(0.0),
        TaskKind::Instantaneous => 0.0,
    }
}

/// Pick the strategy for `task`.
pub fn strategy_for(
    task: &Task,
    initial: f64,
    timings: &TrackerTimings,
) -> Box<dyn ProgressStrategy> {
    match task.kind {
        TaskKind::SimulatedVideo => Box::new(SimulatedTracker::new(SimulatedPlan::new(
            task.target,
            initial,
            timings.report_every,
        ))),
        TaskKind::Heartbeat => Box::new(HeartbeatTracker::new(HeartbeatPlan::new(
            task.target,
            timings.heartbeat_interval,
        ))),
        TaskKind::Instantaneous => Box::new(InstantTracker),
    }
}

/// Everything a tracker driver needs, cloned per tracker.
#[derive(Clone)]
pub(crate) struct TrackerDeps {
    pub client: Arc<dyn RemoteTaskClient>,
    pub clock: Arc<dyn Clock>,
    pub registry: SharedRegistry,
    pub detector: CompletionDetector,
    pub events: broadcast::Sender<TrackerEvent>,
    pub timings: TrackerTimings,
}

impl TrackerDeps {
    /// Detach the driver's own handle, then tear down.
    fn finish(&self, task_id: &str, terminal: Terminal) {
        {
            let mut registry = registry::lock(&self.registry);
            let status = match &terminal {
                Terminal::Completed { .. } => Some(TrackerStatus::Completed),
                Terminal::Failed(_) => Some(TrackerStatus::Failed),
                Terminal::Cancelled(_) => None,
            };
            if let Some(status) = status {
                registry.set_status(task_id, status);
            }
            // Dropping the handle does not abort the task.
            drop(registry.detach_progress_timer(task_id));
        }
        self.detector.finish(task_id, terminal);
    }
}

/// Run one tracker to completion.
///
/// The registry slot must already be reserved. Returns silently whenever the
/// slot disappears or `cancel` fires; whoever removed the slot owns teardown.
pub(crate) async fn drive(task: Task, deps: TrackerDeps, cancel: CancellationToken) {
    let task_id = task.id.clone();

    let task = if task.is_enrolled() {
        task
    } else {
        debug!(task_id = %task_id, "waiting for enrollment");
        let waited = tokio::select! {
            _ = cancel.cancelled() => return,
            waited = wait_for_enrollment(
                deps.client.as_ref(),
                &task_id,
                deps.timings.enrollment_timeout,
                deps.timings.enrollment_poll,
            ) => waited,
        };
        match waited {
            Some(enrolled) => enrolled,
            None => {
                let error = TrackerError::EnrollmentTimeout {
                    task_id: task_id.clone(),
                    timeout_ms: u64::try_from(deps.timings.enrollment_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                };
                deps.finish(&task_id, Terminal::Failed(error));
                return;
            }
        }
    };

    if !registry::lock(&deps.registry).has(&task_id) {
        return;
    }

    let initial = initial_progress(&task, deps.clock.now());
    let mut strategy = strategy_for(&task, initial, &deps.timings);
    {
        let mut registry = registry::lock(&deps.registry);
        registry.record_progress(&task_id, initial);
        registry.set_status(&task_id, strategy.start_status());
    }
    info!(task_id = %task_id, kind = %task.kind, initial, "tracking started");

    let render = spawn_render_timer(
        task_id.clone(),
        deps.registry.clone(),
        deps.events.clone(),
        deps.timings.render_tick,
    );
    if !registry::lock(&deps.registry).attach_render_timer(&task_id, render.abort_handle()) {
        render.abort();
        return;
    }

    let ctx = TrackerContext::new(
        task_id.clone(),
        task.target,
        deps.client.clone(),
        deps.registry.clone(),
        deps.timings.retry,
    );

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => return,
            step = strategy.tick(&ctx) => step,
        };
        match step {
            Step::Wait(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if !ctx.is_active() {
                    return;
                }
            }
            Step::Finish(terminal) => {
                deps.finish(&task_id, terminal);
                return;
            }
            Step::Abandon => {
                debug!(task_id = %task_id, "tracker removed mid-flight");
                return;
            }
        }
    }
}

/// Wait for a tracker's driver and tear the tracker down if the driver died.
///
/// `cancel` is the token of the registry slot the driver was started for.
/// Any teardown of that slot cancels it, so a cancelled token means the slot
/// is already gone and must not be touched.
pub(crate) async fn supervise(
    task_id: String,
    driver: JoinHandle<()>,
    deps: TrackerDeps,
    cancel: CancellationToken,
) {
    let Err(join_error) = driver.await else {
        return;
    };
    if cancel.is_cancelled() {
        return;
    }
    let reason = if join_error.is_panic() {
        let payload = join_error.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "driver panicked".to_owned())
    } else {
        join_error.to_string()
    };
    error!(task_id = %task_id, reason = %reason, "tracker driver died");
    deps.finish(
        &task_id,
        Terminal::Failed(TrackerError::TrackerCrashed {
            task_id: task_id.clone(),
            reason,
        }),
    );
}

/// Advance the UI counter once per `tick` until the tracker disappears.
pub(crate) fn spawn_render_timer(
    task_id: String,
    registry: SharedRegistry,
    events: broadcast::Sender<TrackerEvent>,
    tick: Duration,
) -> JoinHandle<()> {
    let step = tick.as_secs_f64();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        loop {
            interval.tick().await;
            let Some(value) = registry::lock(&registry).advance_display(&task_id, step) else {
                break;
            };
            let _ = events.send(TrackerEvent::Progress {
                task_id: task_id.clone(),
                value,
            });
        }
    })
}
