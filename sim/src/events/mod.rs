//! Lifecycle events for simulator observability
//!
//! Request and stream handling emit [`SimEvent`]s through an
//! [`EventEmitter`]; the trackers subscribe to them on the shared
//! [`eventbus::EventBus`].
//!
//! # Event Types
//!
//! See [`EventPayload`] for the complete list, keyed by discriminator:
//! - `request.*`: started, completed, failed
//! - `stream.*`: started, first_token, token, token_batch, completed
//! - `error.*`: occurred, pattern_detected
//! - `cache.hit`, `cost.calculated`, `latency.measured`, `budget.exceeded`

mod emitter;
mod types;

pub use emitter::EventEmitter;
pub use types::{EventPayload, SimEvent};
