//! Tracker error types

use thiserror::Error;

/// Errors raised by the metrics trackers
///
/// Apart from configuration problems these all indicate a caller that broke
/// a lifecycle sequence; they are never used for budget or SLO conditions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("SLO target must be strictly between 0 and 1, got {0}")]
    InvalidSlo(f64),

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Stream already started: {0}")]
    DuplicateStream(String),

    #[error("Stream already completed: {0}")]
    StreamAlreadyCompleted(String),

    #[error("Token recorded before first token on stream {0}")]
    FirstTokenMissing(String),

    #[error("First token already recorded on stream {0}")]
    FirstTokenAlreadyRecorded(String),

    #[error("Unknown budget limit: {0}")]
    UnknownLimit(String),

    #[error("Invalid budget limit {name}: {reason}")]
    InvalidLimit { name: String, reason: String },
}
