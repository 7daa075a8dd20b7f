//! Event and handler traits, subscriptions and the subscriber registry

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::pattern::EventPattern;
use crate::priority::Priority;

/// An event the bus can route
///
/// The discriminator is matched against subscription patterns; the priority
/// selects the queue tier.
pub trait BusEvent: Send + Sync + 'static {
    fn event_type(&self) -> &str;
    fn priority(&self) -> Priority;
}

/// A subscriber callback
///
/// Each invocation runs in its own task under the bus's handler timeout.
/// Returning an error (or panicking) marks the delivery as failed without
/// affecting other subscribers.
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    async fn handle(&self, event: Arc<E>) -> eyre::Result<()>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<E, F>(f: F) -> FnHandler<F>
where
    F: Fn(&E) -> eyre::Result<()> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<E, F> EventHandler<E> for FnHandler<F>
where
    E: Send + Sync + 'static,
    F: Fn(&E) -> eyre::Result<()> + Send + Sync,
{
    async fn handle(&self, event: Arc<E>) -> eyre::Result<()> {
        (self.f)(event.as_ref())
    }
}

/// Handle returned by subscribe, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Options for a subscription
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Name of the subscribing component, used in logs
    pub subscriber: String,
    /// Event type pattern, see [`EventPattern`]
    pub pattern: String,
    /// Only events at or above this priority are delivered
    pub min_priority: Priority,
}

impl SubscribeOptions {
    pub fn new(subscriber: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            pattern: pattern.into(),
            min_priority: Priority::Low,
        }
    }

    pub fn min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = priority;
        self
    }
}

/// A registered subscription
pub(crate) struct Subscription<E> {
    pub id: SubscriptionId,
    pub subscriber: String,
    pub pattern: EventPattern,
    pub min_priority: Priority,
    pub handler: Arc<dyn EventHandler<E>>,
}

impl<E: BusEvent> Subscription<E> {
    fn wants(&self, event: &E) -> bool {
        event.priority() >= self.min_priority && self.pattern.matches(event.event_type())
    }
}

/// A handler selected for one delivery
pub(crate) struct Target<E> {
    pub id: SubscriptionId,
    pub subscriber: String,
    pub handler: Arc<dyn EventHandler<E>>,
}

/// Subscriber registry, in registration order
pub(crate) struct Registry<E> {
    subscriptions: Vec<Subscription<E>>,
    next_id: u64,
}

impl<E: BusEvent> Registry<E> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: 1,
        }
    }

    pub fn insert(
        &mut self,
        subscriber: String,
        pattern: EventPattern,
        min_priority: Priority,
        handler: Arc<dyn EventHandler<E>>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            subscriber,
            pattern,
            min_priority,
            handler,
        });
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription<E>> {
        let index = self.subscriptions.iter().position(|s| s.id == id)?;
        Some(self.subscriptions.remove(index))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handlers interested in `event`
    pub fn targets(&self, event: &E) -> Vec<Target<E>> {
        self.subscriptions
            .iter()
            .filter(|s| s.wants(event))
            .map(|s| Target {
                id: s.id,
                subscriber: s.subscriber.clone(),
                handler: Arc::clone(&s.handler),
            })
            .collect()
    }
}
