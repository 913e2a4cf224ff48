//! Waiting for remote enrollment.
//!
//! Enrollment is performed elsewhere (usually a UI action) and may race with
//! tracker startup, so trackers poll the task record until `enrolled_at`
//! shows up instead of assuming it is immediate.

use crate::client::RemoteTaskClient;
use crate::scheduler::tasks::Task;
use std::time::Duration;
use tracing::debug;

/// Poll `get_task` every `poll_interval` until the task is enrolled.
///
/// Returns the enrolled task record, or `None` once `timeout` elapses.
/// Failed lookups count as "not yet enrolled".
pub async fn wait_for_enrollment(
    client: &dyn RemoteTaskClient,
    task_id: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Option<Task> {
    let poll = async {
        loop {
            match client.get_task(task_id).await {
                Ok(Some(task)) if task.is_enrolled() => return task,
                Ok(Some(_)) => debug!(task_id, "not enrolled yet"),
                Ok(None) => debug!(task_id, "task not visible yet"),
                Err(e) => debug!(task_id, error = %e, "enrollment lookup failed"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::time::timeout(timeout, poll).await.ok()
}

/// Returns `true` as soon as the task is enrolled, `false` after `timeout`.
pub async fn wait_until_enrolled(
    client: &dyn RemoteTaskClient,
    task_id: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    wait_for_enrollment(client, task_id, timeout, poll_interval)
        .await
        .is_some()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::client::mock::MockTaskClient;
    use crate::scheduler::tasks::{TaskKind, TaskTarget};

    fn client() -> MockTaskClient {
        MockTaskClient::new().with_task(Task::new(
            "q1",
            TaskKind::SimulatedVideo,
            TaskTarget::with_leeway(120.0, 10.0),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_true_once_enrolled() {
        let client = client();
        client.enroll_after_polls("q1", 3);

        let started = tokio::time::Instant::now();
        let enrolled = wait_until_enrolled(
            &client,
            "q1",
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await;

        assert!(enrolled);
        assert_eq!(client.get_task_calls().len(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_timeout() {
        let client = client();

        let started = tokio::time::Instant::now();
        let enrolled = wait_until_enrolled(
            &client,
            "q1",
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await;

        assert!(!enrolled);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        let polls = client.get_task_calls().len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.get_task_calls().len(), polls, "polling must stop");
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_errors_keep_polling() {
        let client = client();
        client.fail_next_get_tasks(2);
        client.mark_enrolled("q1");

        let task = wait_for_enrollment(
            &client,
            "q1",
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
        .await
        .expect("enrolled");
        assert_eq!(task.id, "q1");
        assert_eq!(client.get_task_calls().len(), 3);
    }
}
