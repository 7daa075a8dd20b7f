//! LLMSim - observability core for an LLM API simulation server
//!
//! Request and stream handlers emit lifecycle events onto a bounded priority
//! [`eventbus::EventBus`]. Background workers fan each event out to the
//! trackers, which keep running aggregates that status endpoints can read at
//! any time.
//!
//! # Core Concepts
//!
//! - **Publishing never blocks**: overflow is counted, not raised
//! - **Handlers are isolated**: a failing or slow tracker cannot stall the others
//! - **Reads are snapshots**: every status is derived fresh from tracker state
//! - **No globals**: each [`Observability`] owns its own bus and trackers
//!
//! # Modules
//!
//! - [`events`] - Event model and the fire-and-forget emitter
//! - [`metrics`] - SLO, streaming latency and cost trackers
//! - [`observability`] - Hub wiring the trackers to the bus
//! - [`simulate`] - Synthetic request load
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod simulate;

pub use config::Config;
pub use events::{EventEmitter, EventPayload, SimEvent};
pub use observability::{Observability, ObservabilitySnapshot};
pub use simulate::{SimulationConfig, SimulationReport, run_simulation};
