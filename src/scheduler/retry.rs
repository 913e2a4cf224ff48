//! Bounded fixed-delay retries for remote calls.

use crate::client::{ProgressReport, RemoteTaskClient};
use crate::error::{Result, TrackerError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for progress reports and enrollment calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for ReportRetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl ReportRetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is exhausted.
///
/// Exhaustion yields [`TrackerError::ReportFailure`] carrying the last error.
pub async fn retry_fixed<T, F, Fut>(
    policy: ReportRetryPolicy,
    task_id: &str,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = String::new();
    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(task_id, attempt, "{what} succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(
                    task_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "{what} failed"
                );
                last_error = e.to_string();
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(TrackerError::ReportFailure {
        task_id: task_id.to_owned(),
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Report progress with retries.
pub async fn report_with_retry(
    client: &dyn RemoteTaskClient,
    policy: ReportRetryPolicy,
    task_id: &str,
    value: Option<f64>,
    is_final: bool,
) -> Result<ProgressReport> {
    retry_fixed(policy, task_id, "progress report", move || {
        client.report_progress(task_id, value, is_final)
    })
    .await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::client::mock::MockTaskClient;
    use crate::scheduler::tasks::{Task, TaskKind, TaskTarget};

    fn client() -> MockTaskClient {
        MockTaskClient::new().with_task(Task::new(
            "q1",
            TaskKind::SimulatedVideo,
            TaskTarget::with_leeway(120.0, 10.0),
        ))
    }

    #[test]
    fn policy_has_at_least_one_attempt() {
        assert_eq!(ReportRetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let client = client();
        client.fail_next_reports("q1", 2);
        let policy = ReportRetryPolicy::new(3, Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let report = report_with_retry(&client, policy, "q1", Some(10.0), false)
            .await
            .unwrap();
        assert_eq!(report.progress, Some(10.0));
        assert_eq!(client.reports_for("q1").len(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_becomes_report_failure() {
        let client = client();
        client.fail_next_reports("q1", 5);
        let policy = ReportRetryPolicy::new(3, Duration::from_millis(500));

        let err = report_with_retry(&client, policy, "q1", None, true)
            .await
            .unwrap_err();
        match err {
            TrackerError::ReportFailure {
                task_id, attempts, ..
            } => {
                assert_eq!(task_id, "q1");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected ReportFailure, got {other:?}"),
        }
        assert_eq!(client.reports_for("q1").len(), 3);
    }
}
