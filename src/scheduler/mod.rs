//! Background progress-tracking scheduler.
//!
//! Tracks accepted tasks concurrently, reports their progress to the remote
//! service, and re-attaches unfinished trackers after a restart.

pub mod clock;
pub mod completion;
pub mod enrollment;
pub mod registry;
pub mod resume;
pub mod retry;
pub mod runner;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::{CancelReason, CompletionDetector, Terminal, TrackerEvent};
pub use enrollment::{wait_for_enrollment, wait_until_enrolled};
pub use registry::{SharedRegistry, TaskRegistry, TrackerSnapshot, TrackerState, TrackerStatus};
pub use resume::{ResumeList, ResumeStore, ResumptionManager};
pub use retry::ReportRetryPolicy;
pub use runner::Scheduler;
pub use tasks::{Task, TaskKind, TaskTarget};
