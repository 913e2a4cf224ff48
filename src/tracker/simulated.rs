//! Simulated tracker for tasks whose progress the client cannot observe.
//!
//! The tracker ramps a simulated counter from the initial progress towards
//! the raw target, reporting once per cycle, so that the final report lands
//! after the adjusted target has elapsed in wall-clock time.

use crate::scheduler::completion::Terminal;
use crate::scheduler::registry::TrackerStatus;
use crate::scheduler::tasks::TaskTarget;
use crate::tracker::{ProgressStrategy, Step, TrackerContext, saturating_secs};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, trace};

/// Precomputed ramp for one simulated task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedPlan {
    pub raw: f64,
    pub leeway: f64,
    pub initial: f64,
    /// Seconds of wall-clock time until the final report.
    pub time_remaining: f64,
    /// Simulated progress gained per real second.
    pub speed_factor: f64,
    /// Simulated progress gained per cycle.
    pub increment: f64,
    pub every: Duration,
    /// Number of reporting cycles before the final report.
    pub ramp_ticks: u32,
    /// Delay between the last ramp tick and the final report.
    pub final_wait: Duration,
}

impl SimulatedPlan {
    pub fn new(target: TaskTarget, initial: f64, every: Duration) -> Self {
        let time_remaining = (target.adjusted - initial).max(0.0);
        let every_secs = every.as_secs_f64();

        if every_secs <= 0.0 || time_remaining < every_secs {
            return Self {
                raw: target.raw,
                leeway: target.leeway(),
                initial,
                time_remaining,
                speed_factor: 1.0,
                increment: 0.0,
                every,
                ramp_ticks: 0,
                final_wait: saturating_secs(time_remaining),
            };
        }

        let speed_factor = (target.raw - initial) / time_remaining;
        let cycles = (time_remaining / every_secs).ceil();
        let ramp_ticks = (cycles as u32).saturating_sub(1);
        let final_wait = (time_remaining - f64::from(ramp_ticks) * every_secs).max(0.0);

        Self {
            raw: target.raw,
            leeway: target.leeway(),
            initial,
            time_remaining,
            speed_factor,
            increment: every_secs * speed_factor,
            every,
            ramp_ticks,
            final_wait: saturating_secs(final_wait),
        }
    }

    /// Total cycles including the final report.
    pub fn cycles(&self) -> u32 {
        self.ramp_ticks + 1
    }
}

/// Value to report for a ramp cycle, or `None` to skip the cycle.
///
/// Values are floored and capped at `raw`. A value past `raw - leeway`
/// would let the server complete the task early, so it is held back.
pub fn cycle_report_value(simulated: f64, raw: f64, leeway: f64) -> Option<f64> {
    let value = simulated.floor().min(raw);
    if value > raw - leeway {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Start,
    Ramp { done: u32 },
    Final,
}

/// Simulated-video strategy.
#[derive(Debug)]
pub struct SimulatedTracker {
    plan: SimulatedPlan,
    simulated: f64,
    phase: Phase,
}

impl SimulatedTracker {
    pub fn new(plan: SimulatedPlan) -> Self {
        Self {
            simulated: plan.initial,
            plan,
            phase: Phase::Start,
        }
    }

    pub fn plan(&self) -> &SimulatedPlan {
        &self.plan
    }

    fn next_after_ramp(&mut self, done: u32) -> Step {
        if done < self.plan.ramp_ticks {
            self.phase = Phase::Ramp { done };
            Step::Wait(self.plan.every)
        } else {
            self.phase = Phase::Final;
            Step::Wait(self.plan.final_wait)
        }
    }
}

#[async_trait]
impl ProgressStrategy for SimulatedTracker {
    fn start_status(&self) -> TrackerStatus {
        TrackerStatus::Accelerating
    }

    async fn tick(&mut self, ctx: &TrackerContext) -> Step {
        match self.phase {
            Phase::Start => {
                debug!(
                    task_id = ctx.task_id(),
                    speed_factor = self.plan.speed_factor,
                    cycles = self.plan.cycles(),
                    final_wait_ms = self.plan.final_wait.as_millis() as u64,
                    "simulated plan"
                );
                self.next_after_ramp(0)
            }
            Phase::Ramp { done } => {
                self.simulated += self.plan.increment;
                let done = done + 1;
                match cycle_report_value(self.simulated, self.plan.raw, self.plan.leeway) {
                    Some(value) => {
                        let result = ctx.report(Some(value), false).await;
                        if !ctx.is_active() {
                            return Step::Abandon;
                        }
                        match result {
                            Ok(report) => {
                                let confirmed = report.progress.unwrap_or(value);
                                ctx.record_progress(confirmed.min(self.plan.raw));
                            }
                            Err(e) => return Step::Finish(Terminal::Failed(e)),
                        }
                    }
                    None => {
                        trace!(
                            task_id = ctx.task_id(),
                            cycle = done,
                            "holding back report near target"
                        );
                    }
                }
                self.next_after_ramp(done)
            }
            Phase::Final => {
                ctx.set_status(TrackerStatus::FinalReport);
                let result = ctx.report(Some(self.plan.raw), true).await;
                if !ctx.is_active() {
                    return Step::Abandon;
                }
                match result {
                    Ok(_) => {
                        ctx.record_progress(self.plan.raw);
                        Step::Finish(Terminal::Completed {
                            progress: self.plan.raw,
                        })
                    }
                    Err(e) => Step::Finish(Terminal::Failed(e)),
                }
            }
        }
    }
}
