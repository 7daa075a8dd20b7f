//! Observability hub: one bus, three trackers, wired together
//!
//! ```text
//!   request code ──► EventEmitter ──► EventBus<SimEvent>
//!                                         │
//!        ┌────────────────┬───────────────┼──────────────────┐
//!        ▼                ▼               ▼                  ▼
//!  request.completed  error.occurred   stream.*        cost.calculated
//!        └──────┬─────────┘               │                  │
//!               ▼                         ▼                  ▼
//!      ErrorMetricsTracker   StreamingMetricsTracker    CostTracker
//!               │                                            │
//!               └─► error.pattern_detected      budget.exceeded ◄─┘
//! ```
//!
//! Status reads go straight to the trackers, so a snapshot is always
//! available even when the bus is stalled or stopped.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use eventbus::{BusError, BusStats, EventBus, EventHandler, SubscribeOptions, SubscriptionId};
use eyre::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::events::{EventEmitter, EventPayload, SimEvent};
use crate::metrics::{
    CostSummary, CostTracker, ErrorBreakdown, ErrorMetricsTracker, SloStatus, StreamingMetricsTracker, StreamingStats,
    TrackerError,
};

/// Point-in-time view of every aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub bus: BusStats,
    pub slo: SloStatus,
    pub errors: ErrorBreakdown,
    pub streaming: StreamingStats,
    pub cost: CostSummary,
}

/// Feeds successes and errors into the SLO tracker
struct SloHandler {
    tracker: Arc<ErrorMetricsTracker>,
    emitter: EventEmitter,
}

#[async_trait]
impl EventHandler<SimEvent> for SloHandler {
    async fn handle(&self, event: Arc<SimEvent>) -> eyre::Result<()> {
        match &event.payload {
            EventPayload::RequestCompleted { endpoint, .. } => self.tracker.record_success(endpoint),
            EventPayload::ErrorOccurred {
                endpoint,
                status_code,
                error_type,
                message,
            } => {
                if let Some(pattern) = self.tracker.record_error(endpoint, *status_code, error_type, message) {
                    self.emitter.error_pattern(&pattern.label(), pattern.count);
                }
            }
            other => debug!(event_type = other.event_type(), "SloHandler: ignoring event"),
        }
        Ok(())
    }
}

/// Drives stream lifecycles from event timestamps
struct StreamingHandler {
    tracker: Arc<StreamingMetricsTracker>,
}

#[async_trait]
impl EventHandler<SimEvent> for StreamingHandler {
    async fn handle(&self, event: Arc<SimEvent>) -> eyre::Result<()> {
        let at = event.timestamp;
        match &event.payload {
            EventPayload::StreamStarted { stream_id } => self.tracker.start_stream(stream_id, at)?,
            EventPayload::FirstTokenGenerated { stream_id, .. } => {
                self.tracker.record_first_token(stream_id, at)?;
            }
            EventPayload::StreamingTokenGenerated { stream_id, .. } => {
                self.tracker.record_token(stream_id, at)?;
            }
            EventPayload::TokenBatchGenerated { stream_id, count } => self.tracker.record_tokens(stream_id, *count)?,
            EventPayload::StreamCompleted { stream_id } => {
                self.tracker.complete_stream(stream_id, at)?;
            }
            other => debug!(event_type = other.event_type(), "StreamingHandler: ignoring event"),
        }
        Ok(())
    }
}

/// Accounts costs and republishes budget crossings
struct CostHandler {
    tracker: Arc<CostTracker>,
    emitter: EventEmitter,
}

#[async_trait]
impl EventHandler<SimEvent> for CostHandler {
    async fn handle(&self, event: Arc<SimEvent>) -> eyre::Result<()> {
        if let EventPayload::CostCalculated { model, cost, tokens } = &event.payload {
            for exceeded in self.tracker.record_cost(model, *cost, *tokens, event.timestamp) {
                self.emitter
                    .budget_exceeded(&exceeded.limit, exceeded.consumed, exceeded.ceiling);
            }
        }
        Ok(())
    }
}

/// Owns the bus and the trackers for one server instance
pub struct Observability {
    bus: Arc<EventBus<SimEvent>>,
    emitter: EventEmitter,
    slo: Arc<ErrorMetricsTracker>,
    streaming: Arc<StreamingMetricsTracker>,
    cost: Arc<CostTracker>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Observability {
    /// Build the bus and trackers; nothing is subscribed until [`Observability::start`]
    pub fn new(config: &Config) -> Result<Self, TrackerError> {
        debug!("Observability::new: called");
        let bus = Arc::new(EventBus::new(config.bus.clone()));
        Ok(Self {
            emitter: EventEmitter::new(&bus),
            bus,
            slo: Arc::new(ErrorMetricsTracker::from_config(&config.slo)?),
            streaming: Arc::new(StreamingMetricsTracker::from_config(&config.streaming)),
            cost: Arc::new(CostTracker::from_config(&config.budgets)?),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe the trackers and start the bus workers
    pub fn start(&self) -> Result<(), BusError> {
        debug!("Observability::start: called");
        let slo = || SloHandler {
            tracker: Arc::clone(&self.slo),
            emitter: self.emitter.clone(),
        };

        let ids = vec![
            self.bus
                .subscribe_with(SubscribeOptions::new("slo", "request.completed"), slo())?,
            self.bus
                .subscribe_with(SubscribeOptions::new("slo", "error.occurred"), slo())?,
            self.bus.subscribe_with(
                SubscribeOptions::new("streaming", "stream.*"),
                StreamingHandler {
                    tracker: Arc::clone(&self.streaming),
                },
            )?,
            self.bus.subscribe_with(
                SubscribeOptions::new("cost", "cost.calculated"),
                CostHandler {
                    tracker: Arc::clone(&self.cost),
                    emitter: self.emitter.clone(),
                },
            )?,
        ];
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);

        self.bus.start()?;
        info!("Observability started");
        Ok(())
    }

    /// Stop the bus, optionally delivering what is still queued
    pub async fn shutdown(&self, drain: bool) -> Result<(), BusError> {
        debug!(drain, "Observability::shutdown: called");
        self.bus.stop(drain).await?;
        let ids: Vec<_> = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner));
        for id in ids {
            self.bus.unsubscribe(id)?;
        }
        info!(drain, "Observability stopped");
        Ok(())
    }

    /// Wait until every queued event has been handled
    pub async fn wait_idle(&self) {
        self.bus.wait_idle().await;
    }

    pub fn emitter(&self) -> EventEmitter {
        self.emitter.clone()
    }

    pub fn bus(&self) -> &Arc<EventBus<SimEvent>> {
        &self.bus
    }

    pub fn slo_tracker(&self) -> &ErrorMetricsTracker {
        &self.slo
    }

    pub fn streaming_tracker(&self) -> &StreamingMetricsTracker {
        &self.streaming
    }

    pub fn cost_tracker(&self) -> &CostTracker {
        &self.cost
    }

    /// Current aggregates from every component
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            bus: self.bus.statistics(),
            slo: self.slo.get_slo_status(),
            errors: self.slo.error_breakdown(),
            streaming: self.streaming.get_aggregate_stats(),
            cost: self.cost.summary(),
        }
    }

    /// Snapshot as pretty JSON
    pub fn export_json(&self) -> eyre::Result<String> {
        serde_json::to_string_pretty(&self.snapshot()).context("Failed to serialize snapshot")
    }
}
