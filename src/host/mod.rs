//! Host integration: the events a host application feeds the scheduler and
//! the stdio bridge that carries them.

pub mod stdio;

use crate::scheduler::tasks::Task;
use serde::{Deserialize, Serialize};

/// Events raised by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// The full task list was (re)loaded. Triggers the one-time resumption sweep.
    TaskListRefreshed { tasks: Vec<Task> },
    /// The user enrolled in a task outside the scheduler.
    TaskEnrolled { task: Task },
    /// An application bound to heartbeat tasks exited.
    ApplicationExited { application_id: String },
    /// The process is about to exit.
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn parses_tagged_events() {
        let event: HostEvent =
            serde_json::from_str(r#"{"event":"application_exited","application_id":"app-1"}"#)
                .unwrap();
        assert_eq!(
            event,
            HostEvent::ApplicationExited {
                application_id: "app-1".into()
            }
        );

        let event: HostEvent = serde_json::from_str(r#"{"event":"shutting_down"}"#).unwrap();
        assert_eq!(event, HostEvent::ShuttingDown);
    }

    #[test]
    fn parses_task_list() {
        let json = r#"{
            "event": "task_list_refreshed",
            "tasks": [{"id": "q1", "kind": "heartbeat", "target": {"raw": 900}}]
        }"#;
        match serde_json::from_str::<HostEvent>(json).unwrap() {
            HostEvent::TaskListRefreshed { tasks } => {
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].target.adjusted, 900.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
