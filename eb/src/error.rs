//! Event bus error types

use thiserror::Error;

use crate::handler::SubscriptionId;

/// Errors returned by bus operations
///
/// Queue overflow is deliberately absent: it is absorbed by the overflow
/// policy and only visible through [`crate::BusStats`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("Event bus is already running")]
    AlreadyRunning,

    #[error("Event bus is not running")]
    NotRunning,

    #[error("No tokio runtime available to spawn bus workers")]
    NoRuntime,

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("Invalid subscription pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl BusError {
    /// Check if this error means the bus no longer accepts events
    pub fn is_closed(&self) -> bool {
        matches!(self, BusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_message() {
        let err = BusError::InvalidPattern {
            pattern: "request.[".to_string(),
            reason: "unclosed bracket".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("request.["));
        assert!(msg.contains("unclosed bracket"));
    }

    #[test]
    fn test_unknown_subscription_message() {
        let err = BusError::UnknownSubscription(SubscriptionId(42));
        assert!(err.to_string().contains("42"));
        assert!(!err.is_closed());
        assert!(BusError::Closed.is_closed());
    }
}
