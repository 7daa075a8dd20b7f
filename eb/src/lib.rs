//! EventBus - bounded priority pub/sub for in-process observability
//!
//! Request handlers publish lifecycle events; independent consumers
//! (metrics trackers, dashboards, loggers) subscribe by event type. Publishing
//! never blocks and never runs handlers on the publisher's task.
//!
//! # Architecture
//!
//! ```text
//!  publish() ──► ┌──────────────────────────────┐
//!  publish() ──► │  bounded queue, 4 FIFO tiers │  overflow ─► dropped counter
//!  publish() ──► │  critical > high > normal > low
//!                └──────────────┬───────────────┘
//!                               │ worker task(s)
//!                 ┌─────────────┼─────────────┐
//!                 ▼             ▼             ▼
//!            handler A      handler B     handler C     (own task + timeout each)
//! ```
//!
//! # Guarantees
//!
//! - Higher tiers always drain first; within a tier events leave in publish order.
//! - A worker finishes dispatching one event before taking the next, so with
//!   one worker (the default) each subscriber sees a tier in publish order.
//!   More workers trade that ordering for throughput.
//! - A handler that errors, panics or times out is counted in
//!   [`BusStats::failed`] and logged; other subscribers are unaffected.
//! - Delivery is best effort: the overflow policy may drop events and a
//!   non-draining stop discards the queue.
//!
//! # Usage
//!
//! ```rust,ignore
//! use eventbus::{BusConfig, EventBus, handler_fn};
//!
//! let bus = Arc::new(EventBus::new(BusConfig::default()));
//! bus.subscribe("request.*", handler_fn(|event: &MyEvent| {
//!     println!("{}", event.event_type());
//!     Ok(())
//! }))?;
//! bus.start()?;
//! bus.publish(my_event)?;
//! bus.stop(true).await?;
//! ```

mod bus;
mod config;
mod error;
mod handler;
mod pattern;
mod priority;
mod queue;
mod stats;

pub use bus::EventBus;
pub use config::{BusConfig, OverflowPolicy};
pub use error::BusError;
pub use handler::{BusEvent, EventHandler, FnHandler, SubscribeOptions, SubscriptionId, handler_fn};
pub use pattern::EventPattern;
pub use priority::Priority;
pub use queue::{PriorityQueue, PushOutcome, QueueEntry};
pub use stats::BusStats;

/// Default queue capacity (events)
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
