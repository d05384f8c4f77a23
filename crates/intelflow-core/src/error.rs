//! Error types shared across the intelflow crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by frame parsing and field extraction.
#[derive(Error, Debug)]
pub enum Error {
    /// Topic tag not in the enumerated set. There is no default route.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Frame did not split into a topic token and a payload.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload was not a valid JSON document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
