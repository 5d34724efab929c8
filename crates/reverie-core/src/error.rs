//! Error types for reverie.

use thiserror::Error;

/// Result type alias using reverie's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for reverie operations.
///
/// Only `Config` is fatal before submission; every other variant is scoped
/// to a single job and isolated by the orchestrator (see the propagation
/// policy in the dispatch crate).
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing required field, bad env). Aborts the batch.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The submission command failed outright.
    #[error("Submission failed (exit {code:?}): {stderr}")]
    Submission {
        code: Option<i32>,
        stderr: String,
    },

    /// The submission command succeeded but emitted no parseable handle.
    /// The job may still complete, but it cannot be tracked.
    #[error("Submission accepted but no job handle could be parsed from output")]
    HandleMissing,

    /// Result store (Redis) read failed. Swallowed by the poller.
    #[error("Result store error: {0}")]
    ResultStore(String),

    /// A materialization step failed; the job is re-queued for another cycle.
    #[error("Materialization error: {0}")]
    Materialization(String),

    /// Dedup ledger read failed; degrades to an empty ledger.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// HTTP/network request failed.
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
