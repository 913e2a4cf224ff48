//! Scriptable in-memory [`RemoteTaskClient`].
//!
//! Records every call with a `tokio::time::Instant` timestamp so tests
//! running under paused time can assert on report cadence.

use crate::client::{ProgressReport, RemoteTaskClient};
use crate::error::{Result, TrackerError};
use crate::scheduler::tasks::Task;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One recorded `report_progress` call, including failed attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportCall {
    pub task_id: String,
    pub value: Option<f64>,
    pub is_final: bool,
    pub at: Instant,
    /// Whether the mock answered with an error.
    pub failed: bool,
}

#[derive(Debug, Default)]
struct MockState {
    tasks: HashMap<String, Task>,
    heartbeat_script: HashMap<String, VecDeque<Option<f64>>>,
    last_progress: HashMap<String, f64>,
    report_failures: HashMap<String, u32>,
    enroll_failures: u32,
    get_task_failures: u32,
    enroll_on_get: HashMap<String, u32>,
    report_latency: Duration,
    reports: Vec<ReportCall>,
    enroll_calls: Vec<String>,
    get_task_calls: Vec<String>,
}

/// In-memory remote task service.
#[derive(Debug, Default)]
pub struct MockTaskClient {
    state: Mutex<MockState>,
}

impl MockTaskClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert_task`](Self::insert_task).
    pub fn with_task(self, task: Task) -> Self {
        self.insert_task(task);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_task(&self, task: Task) {
        self.lock().tasks.insert(task.id.clone(), task);
    }

    /// Stamp the stored task as enrolled now.
    pub fn mark_enrolled(&self, task_id: &str) {
        if let Some(task) = self.lock().tasks.get_mut(task_id) {
            task.enrolled_at = Some(Utc::now());
        }
    }

    /// Mark the stored task enrolled after `polls` more `get_task` calls for it.
    pub fn enroll_after_polls(&self, task_id: &str, polls: u32) {
        self.lock().enroll_on_get.insert(task_id.to_owned(), polls);
    }

    /// Queue server progress values returned by successive heartbeats.
    ///
    /// `None` entries simulate a rejected session.
    pub fn script_heartbeats(&self, task_id: &str, values: impl IntoIterator<Item = Option<f64>>) {
        self.lock()
            .heartbeat_script
            .entry(task_id.to_owned())
            .or_default()
            .extend(values);
    }

    /// Fail the next `count` report calls for `task_id`.
    pub fn fail_next_reports(&self, task_id: &str, count: u32) {
        self.lock()
            .report_failures
            .insert(task_id.to_owned(), count);
    }

    pub fn fail_next_enrolls(&self, count: u32) {
        self.lock().enroll_failures = count;
    }

    pub fn fail_next_get_tasks(&self, count: u32) {
        self.lock().get_task_failures = count;
    }

    /// Delay every report response by `latency`.
    pub fn set_report_latency(&self, latency: Duration) {
        self.lock().report_latency = latency;
    }

    pub fn reports_for(&self, task_id: &str) -> Vec<ReportCall> {
        self.lock()
            .reports
            .iter()
            .filter(|call| call.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Successful final reports for `task_id`.
    pub fn final_reports(&self, task_id: &str) -> Vec<ReportCall> {
        self.reports_for(task_id)
            .into_iter()
            .filter(|call| call.is_final && !call.failed)
            .collect()
    }

    pub fn enroll_calls(&self) -> Vec<String> {
        self.lock().enroll_calls.clone()
    }

    pub fn get_task_calls(&self) -> Vec<String> {
        self.lock().get_task_calls.clone()
    }
}

#[async_trait]
impl RemoteTaskClient for MockTaskClient {
    async fn enroll(&self, task_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.enroll_calls.push(task_id.to_owned());
        if state.enroll_failures > 0 {
            state.enroll_failures -= 1;
            return Err(TrackerError::Client("injected enroll failure".to_owned()));
        }
        match state.tasks.get_mut(task_id) {
            Some(task) => {
                task.enrolled_at.get_or_insert_with(Utc::now);
                Ok(())
            }
            None => Err(TrackerError::Client(format!("unknown task {task_id}"))),
        }
    }

    async fn report_progress(
        &self,
        task_id: &str,
        value: Option<f64>,
        is_final: bool,
    ) -> Result<ProgressReport> {
        let latency = self.lock().report_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        let failing = match state.report_failures.get_mut(task_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        state.reports.push(ReportCall {
            task_id: task_id.to_owned(),
            value,
            is_final,
            at: Instant::now(),
            failed: failing,
        });
        if failing {
            return Err(TrackerError::Client("injected report failure".to_owned()));
        }

        let known = state
            .last_progress
            .get(task_id)
            .copied()
            .or_else(|| state.tasks.get(task_id).and_then(|task| task.progress))
            .unwrap_or(0.0);

        let progress = match value {
            Some(value) => Some(value.max(known)),
            None if !is_final => match state
                .heartbeat_script
                .get_mut(task_id)
                .and_then(VecDeque::pop_front)
            {
                Some(scripted) => scripted,
                None => Some(known),
            },
            None => Some(known),
        };

        if let Some(progress) = progress {
            state.last_progress.insert(task_id.to_owned(), progress);
        }
        if is_final {
            if let Some(task) = state.tasks.get_mut(task_id) {
                task.completed_at = Some(Utc::now());
            }
        }
        Ok(ProgressReport { progress })
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let mut state = self.lock();
        state.get_task_calls.push(task_id.to_owned());
        if state.get_task_failures > 0 {
            state.get_task_failures -= 1;
            return Err(TrackerError::Client("injected get_task failure".to_owned()));
        }

        if let Some(remaining) = state.enroll_on_get.get_mut(task_id) {
            if *remaining == 0 {
                state.enroll_on_get.remove(task_id);
                if let Some(task) = state.tasks.get_mut(task_id) {
                    task.enrolled_at.get_or_insert_with(Utc::now);
                }
            } else {
                *remaining -= 1;
            }
        }

        Ok(state.tasks.get(task_id).cloned())
    }
}
