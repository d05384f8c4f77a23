//! Error types for the ingestion daemon.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame parsing error from the core crate.
    #[error(transparent)]
    Core(#[from] intelflow_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Geo table error.
    #[error("Geo table error: {0}")]
    GeoTable(String),
}
