//! Subscription patterns over event type discriminators

use std::fmt;

use crate::error::BusError;

/// Matches event types for a subscription
///
/// - `*` matches every event type
/// - text with glob metacharacters (`request.*`, `stream.?oken`) is a glob
/// - anything else must equal the event type exactly
#[derive(Debug, Clone)]
pub enum EventPattern {
    All,
    Exact(String),
    Glob(glob::Pattern),
}

impl EventPattern {
    /// Parse a pattern string
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }
        if trimmed == "*" {
            return Ok(Self::All);
        }
        if trimmed.contains(['*', '?', '[']) {
            return glob::Pattern::new(trimmed)
                .map(Self::Glob)
                .map_err(|e| BusError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.msg.to_string(),
                });
        }
        Ok(Self::Exact(trimmed.to_string()))
    }

    /// Whether `event_type` is selected by this pattern
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(expected) => expected == event_type,
            Self::Glob(glob) => glob.matches(event_type),
        }
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Exact(s) => write!(f, "{}", s),
            Self::Glob(glob) => write!(f, "{}", glob.as_str()),
        }
    }
}
