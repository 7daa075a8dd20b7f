//! Fire-and-forget emission handle used by request code

use std::sync::{Arc, Weak};

use eventbus::EventBus;
use tracing::{debug, warn};

use super::types::{EventPayload, SimEvent};

/// Cheap-to-clone handle for publishing lifecycle events
///
/// Emission never fails from the caller's point of view: a full queue is
/// already counted by the bus and a closed bus is only logged.
///
/// Holds the bus weakly: handlers registered on the bus carry emitters, and
/// a strong handle would tie the bus to its own registry.
#[derive(Clone)]
pub struct EventEmitter {
    bus: Weak<EventBus<SimEvent>>,
}

impl EventEmitter {
    pub fn new(bus: &Arc<EventBus<SimEvent>>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
        }
    }

    /// Emit a fully built event
    pub fn emit_event(&self, event: SimEvent) {
        let event_type = event.event_type();
        let Some(bus) = self.bus.upgrade() else {
            debug!(event_type, "EventEmitter::emit: bus dropped");
            return;
        };
        match bus.publish(event) {
            Ok(true) => {}
            Ok(false) => debug!(event_type, "EventEmitter::emit: dropped on overflow"),
            Err(e) if e.is_closed() => debug!(event_type, "EventEmitter::emit: bus closed"),
            Err(e) => warn!(event_type, error = %e, "EventEmitter::emit: publish failed"),
        }
    }

    /// Emit a payload stamped now at its default priority
    pub fn emit(&self, payload: EventPayload) {
        self.emit_event(SimEvent::new(payload));
    }

    // === Convenience methods ===

    pub fn request_started(&self, request_id: &str, endpoint: &str, model: &str) {
        self.emit(EventPayload::RequestStarted {
            request_id: request_id.to_string(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        });
    }

    pub fn request_completed(&self, request_id: &str, endpoint: &str, latency_ms: f64, tokens: u64) {
        self.emit(EventPayload::RequestCompleted {
            request_id: request_id.to_string(),
            endpoint: endpoint.to_string(),
            latency_ms,
            tokens,
        });
    }

    pub fn request_failed(&self, request_id: &str, endpoint: &str, error_type: &str, status_code: u16) {
        self.emit(EventPayload::RequestFailed {
            request_id: request_id.to_string(),
            endpoint: endpoint.to_string(),
            error_type: error_type.to_string(),
            status_code,
        });
    }

    pub fn stream_started(&self, stream_id: &str) {
        self.emit(EventPayload::StreamStarted {
            stream_id: stream_id.to_string(),
        });
    }

    pub fn stream_completed(&self, stream_id: &str) {
        self.emit(EventPayload::StreamCompleted {
            stream_id: stream_id.to_string(),
        });
    }

    pub fn first_token(&self, stream_id: &str, ttft_ms: f64) {
        self.emit(EventPayload::FirstTokenGenerated {
            stream_id: stream_id.to_string(),
            ttft_ms,
        });
    }

    pub fn token(&self, stream_id: &str, token_index: u64, inter_token_ms: f64) {
        self.emit(EventPayload::StreamingTokenGenerated {
            stream_id: stream_id.to_string(),
            token_index,
            inter_token_ms,
        });
    }

    pub fn token_batch(&self, stream_id: &str, count: u64) {
        self.emit(EventPayload::TokenBatchGenerated {
            stream_id: stream_id.to_string(),
            count,
        });
    }

    /// Emit an error event
    pub fn error(&self, endpoint: &str, status_code: u16, error_type: &str, message: &str) {
        self.emit(EventPayload::ErrorOccurred {
            endpoint: endpoint.to_string(),
            status_code,
            error_type: error_type.to_string(),
            message: message.to_string(),
        });
    }

    pub fn error_pattern(&self, pattern: &str, count: u64) {
        self.emit(EventPayload::ErrorPatternDetected {
            pattern: pattern.to_string(),
            count,
        });
    }

    pub fn cache_hit(&self, key: &str, hit: bool) {
        self.emit(EventPayload::CacheHit {
            key: key.to_string(),
            hit,
        });
    }

    pub fn cost(&self, model: &str, cost: f64, tokens: u64) {
        self.emit(EventPayload::CostCalculated {
            model: model.to_string(),
            cost,
            tokens,
        });
    }

    pub fn latency(&self, endpoint: &str, latency_ms: f64) {
        self.emit(EventPayload::LatencyMeasured {
            endpoint: endpoint.to_string(),
            latency_ms,
        });
    }

    pub fn budget_exceeded(&self, limit: &str, consumed: f64, ceiling: f64) {
        self.emit(EventPayload::BudgetExceeded {
            limit: limit.to_string(),
            consumed,
            ceiling,
        });
    }
}
