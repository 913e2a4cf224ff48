//! quest-tracker: background progress tracking for long-running remote quests.
//!
//! The crate tracks many independent tasks at once, simulates or samples
//! their progress, reports it to a remote service, and re-attaches
//! unfinished trackers after a restart.
//!
//! # Architecture
//!
//! - **Remote client**: [`client::RemoteTaskClient`], with an HTTP
//!   implementation and a scriptable mock
//! - **Registry**: at most one tracker per task id
//! - **Trackers**: simulated (video-like), heartbeat (play-time-like), and
//!   instant strategies behind [`tracker::ProgressStrategy`]
//! - **Completion**: single teardown path emitting [`TrackerEvent`]s
//! - **Resumption**: persisted resume list re-validated on startup
//! - **Host bridge**: newline-delimited JSON over stdio

pub mod app_dirs;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod scheduler;
pub mod tracker;

pub use config::SchedulerConfig;
pub use error::{Result, TrackerError};
pub use host::HostEvent;
pub use scheduler::{CancelReason, Scheduler, Task, TaskKind, TaskTarget, TrackerEvent};
