//! Event types for simulated request activity
//!
//! These events represent every observable lifecycle fact of the simulator:
//! - Request lifecycle (start, complete, fail)
//! - Streaming progress (first token, tokens, batches)
//! - Errors and detected error patterns
//! - Cache, cost and latency measurements

use chrono::{DateTime, Utc};
use eventbus::{BusEvent, Priority};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event-specific fields, tagged by discriminator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    // === Request Lifecycle ===
    /// A request was accepted by an endpoint
    #[serde(rename = "request.started")]
    RequestStarted {
        request_id: String,
        endpoint: String,
        model: String,
    },
    /// A request finished successfully
    #[serde(rename = "request.completed")]
    RequestCompleted {
        request_id: String,
        endpoint: String,
        latency_ms: f64,
        tokens: u64,
    },
    /// A request finished with an error response
    #[serde(rename = "request.failed")]
    RequestFailed {
        request_id: String,
        endpoint: String,
        error_type: String,
        status_code: u16,
    },

    // === Streaming ===
    #[serde(rename = "stream.started")]
    StreamStarted { stream_id: String },
    #[serde(rename = "stream.completed")]
    StreamCompleted { stream_id: String },
    /// First token of a stream, `ttft_ms` as observed by the producer
    #[serde(rename = "stream.first_token")]
    FirstTokenGenerated { stream_id: String, ttft_ms: f64 },
    /// A subsequent token; `token_index` is 1-based and counts the first token
    #[serde(rename = "stream.token")]
    StreamingTokenGenerated {
        stream_id: String,
        token_index: u64,
        inter_token_ms: f64,
    },
    /// Several tokens delivered together with no per-token timing
    #[serde(rename = "stream.token_batch")]
    TokenBatchGenerated { stream_id: String, count: u64 },

    // === Errors ===
    #[serde(rename = "error.occurred")]
    ErrorOccurred {
        endpoint: String,
        status_code: u16,
        error_type: String,
        message: String,
    },
    /// The same error repeated often enough to be worth flagging
    #[serde(rename = "error.pattern_detected")]
    ErrorPatternDetected { pattern: String, count: u64 },

    // === Measurements ===
    #[serde(rename = "cache.hit")]
    CacheHit { key: String, hit: bool },
    #[serde(rename = "cost.calculated")]
    CostCalculated { model: String, cost: f64, tokens: u64 },
    #[serde(rename = "latency.measured")]
    LatencyMeasured { endpoint: String, latency_ms: f64 },
    /// A budget limit crossed its ceiling for the current period
    #[serde(rename = "budget.exceeded")]
    BudgetExceeded { limit: String, consumed: f64, ceiling: f64 },
}

impl EventPayload {
    /// Discriminator used for subscription matching
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::RequestStarted { .. } => "request.started",
            EventPayload::RequestCompleted { .. } => "request.completed",
            EventPayload::RequestFailed { .. } => "request.failed",
            EventPayload::StreamStarted { .. } => "stream.started",
            EventPayload::StreamCompleted { .. } => "stream.completed",
            EventPayload::FirstTokenGenerated { .. } => "stream.first_token",
            EventPayload::StreamingTokenGenerated { .. } => "stream.token",
            EventPayload::TokenBatchGenerated { .. } => "stream.token_batch",
            EventPayload::ErrorOccurred { .. } => "error.occurred",
            EventPayload::ErrorPatternDetected { .. } => "error.pattern_detected",
            EventPayload::CacheHit { .. } => "cache.hit",
            EventPayload::CostCalculated { .. } => "cost.calculated",
            EventPayload::LatencyMeasured { .. } => "latency.measured",
            EventPayload::BudgetExceeded { .. } => "budget.exceeded",
        }
    }

    /// Queue tier used unless the publisher overrides it
    ///
    /// Every `stream.*` event shares one tier: tiers drain highest first, so
    /// splitting them would let a completion overtake its own tokens.
    pub fn default_priority(&self) -> Priority {
        match self {
            EventPayload::ErrorOccurred { .. }
            | EventPayload::ErrorPatternDetected { .. }
            | EventPayload::BudgetExceeded { .. } => Priority::High,
            EventPayload::CacheHit { .. } | EventPayload::LatencyMeasured { .. } => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

/// An immutable lifecycle event as it travels over the bus
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub payload: EventPayload,
}

impl SimEvent {
    /// Create an event stamped now, at the payload's default priority
    pub fn new(payload: EventPayload) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Create an event with an explicit timestamp
    pub fn at(payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            priority: payload.default_priority(),
            payload,
        }
    }

    /// Create an event stamped now, at an explicit priority
    pub fn with_priority(payload: EventPayload, priority: Priority) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            priority,
            payload,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

impl BusEvent for SimEvent {
    fn event_type(&self) -> &str {
        self.payload.event_type()
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}
