use thiserror::Error;

use bioexport_core::CoreError;
use bioexport_notify::NotifyError;
use bioexport_queue::QueueError;

/// Errors that can occur in the export service.
///
/// `Interrupted` and `Cancelled` are control-flow outcomes rather than
/// faults: the executor branches on them to decide registry and
/// notification handling. Everything else marks the job `failed`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required request field is missing or malformed. Rejected
    /// before admission with no side effects.
    #[error("invalid request: {0}")]
    Validation(String),

    /// An external collaborator call failed.
    #[error("{service} error: {message}")]
    External {
        service: &'static str,
        message: String,
    },

    /// The process is shutting down; the job is left for recovery.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// The submitter cancelled the job.
    #[error("cancelled by submitter")]
    Cancelled,

    /// The export step itself failed; fatal to the owning job.
    #[error("export error: {0}")]
    Export(String),

    #[error("pool configuration error: {0}")]
    Pools(String),

    #[error("job id error: {0}")]
    Core(#[from] CoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    /// Shorthand for wrapping a collaborator failure.
    pub fn external(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::External {
            service,
            message: err.to_string(),
        }
    }
}
