//! Error types for the remediation engine

use thiserror::Error;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The submitted event is missing required fields. Not retried; the
    /// caller must resubmit corrected data.
    #[error("malformed incident: {0}")]
    MalformedIncident(String),

    /// The history store could not durably record an outcome.
    #[error("history append failed: {cause}")]
    HistoryAppend { cause: anyhow::Error },

    /// The per-workload worker terminated before replying.
    #[error("worker for {workload} terminated before replying")]
    WorkerTerminated { workload: String },
}

/// Errors from the cluster resource interface
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The version token was stale at write time.
    #[error("version conflict")]
    Conflict,

    /// The addressed resource or instance does not exist.
    #[error("resource not found")]
    NotFound,

    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ClusterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClusterError::Timeout
        } else {
            ClusterError::Transport(err.to_string())
        }
    }
}
