//! Event bus configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the bus does with a publish that finds the queue full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Keep the queue as is and drop the new event
    #[default]
    DropIncoming,
    /// Evict the oldest event of the lowest queued tier to make room.
    /// An incoming event below every queued tier is dropped instead.
    DropOldest,
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Max events held in the queue
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Behavior when the queue is at capacity
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Per-handler invocation timeout in milliseconds
    #[serde(rename = "handler-timeout-ms", default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Number of worker tasks draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_capacity() -> usize {
    crate::DEFAULT_QUEUE_CAPACITY
}

fn default_handler_timeout_ms() -> u64 {
    5_000
}

fn default_workers() -> usize {
    1
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            overflow: OverflowPolicy::default(),
            handler_timeout_ms: default_handler_timeout_ms(),
            workers: default_workers(),
        }
    }
}

impl BusConfig {
    /// Config with the given capacity and defaults elsewhere
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Get the handler timeout as a Duration
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}
