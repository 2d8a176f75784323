//! Error types for volley.
//!
//! Per-target problems (bad URLs, refused connections, timeouts) are not errors here: they are
//! recorded as [`FailureKind`](crate::outcome::FailureKind) values on a
//! [`FetchOutcome`](crate::outcome::FetchOutcome). This enum covers the faults that stop a run,
//! or a job, from happening at all.

use thiserror::Error;

/// Result type alias using the volley error type.
pub type Result<T> = std::result::Result<T, VolleyError>;

/// Main error type for volley.
#[derive(Error, Debug)]
pub enum VolleyError {
    /// Configuration rejected before any work started (zero concurrency, zero deadline, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be created or could not hand out a single permit
    #[error("Worker pool exhausted: {0}")]
    PoolExhausted(String),

    /// A dispatched job panicked or was aborted before producing a result
    #[error("Job {0} aborted: {1}")]
    JobAborted(String, String),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (config files, listeners)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
