//! Error types for the progress-tracking scheduler.

/// Top-level error type for quest tracking.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Enrollment was never observed within the configured timeout.
    #[error("task {task_id} was not enrolled within {timeout_ms}ms")]
    EnrollmentTimeout {
        /// Task that never became enrolled.
        task_id: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A progress report kept failing after every retry attempt.
    #[error("progress report for {task_id} failed after {attempts} attempts: {last_error}")]
    ReportFailure {
        /// Task whose report failed.
        task_id: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        last_error: String,
    },

    /// The remote service answered a heartbeat without a progress value.
    #[error("remote service rejected the session for {task_id}")]
    SessionRejected {
        /// Task whose session was rejected.
        task_id: String,
    },

    /// The task could not be found on the remote service.
    #[error("task {task_id} no longer exists")]
    TaskVanished {
        /// Task that disappeared.
        task_id: String,
    },

    /// The tracker's driver task ended without tearing the tracker down.
    #[error("tracker for {task_id} stopped unexpectedly: {reason}")]
    TrackerCrashed {
        /// Task whose tracker crashed.
        task_id: String,
        /// Panic message or join error.
        reason: String,
    },

    /// A tracker for this task id is already registered.
    #[error("task {0} is already being tracked")]
    AlreadyTracking(String),

    /// Progress tracking is switched off.
    #[error("progress tracking is disabled")]
    Disabled,

    /// Remote task API error (transport, status code, decoding).
    #[error("remote client error: {0}")]
    Client(String),

    /// Resume list persistence error.
    #[error("persistence error: {0}")]
    Persist(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TrackerError>;
