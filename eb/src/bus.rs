//! Event Bus - bounded priority pub/sub with async handler dispatch
//!
//! Publishers hand events to a fixed-capacity priority queue and return
//! immediately. Worker tasks drain the queue highest tier first, FIFO within a
//! tier, and deliver each event to every matching subscription. Each handler
//! invocation is its own task bounded by the configured timeout.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::error::BusError;
use crate::handler::{BusEvent, EventHandler, Registry, SubscribeOptions, SubscriptionId, Target};
use crate::pattern::EventPattern;
use crate::queue::{PriorityQueue, PushOutcome, QueueEntry};
use crate::stats::{BusStats, Counters};

/// Bus lifecycle, guarded together with the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Created, accepting events, no workers yet
    Idle,
    Running,
    /// Stop requested; workers finish what is queued and exit
    Stopping { drain: bool },
    Stopped,
}

tokio::task_local! {
    /// Identity of the bus whose handler is running on this task
    static DISPATCHING: usize;
}

struct QueueState<E> {
    queue: PriorityQueue<Arc<E>>,
    lifecycle: Lifecycle,
}

/// What a worker should do next
enum Next<E> {
    Entry(QueueEntry<Arc<E>>),
    Wait,
    Shutdown,
}

/// Outcome of one handler invocation
enum Delivery {
    Delivered,
    Failed(String),
    TimedOut,
}

/// State shared by the bus handle and its workers
struct Shared<E> {
    config: BusConfig,
    state: Mutex<QueueState<E>>,
    registry: RwLock<Registry<E>>,
    counters: Counters,
    /// Signals workers that an event was queued or a stop was requested
    work: Notify,
    /// Signals `wait_idle` callers that the queue may have drained
    idle: Notify,
}

impl<E: BusEvent> Shared<E> {
    fn id(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }

    /// Whether the current task is one of this bus's handler invocations
    fn is_dispatching(&self) -> bool {
        DISPATCHING.try_with(|id| *id == self.id()).unwrap_or(false)
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry<E>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry<E>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_entry(&self) -> Next<E> {
        let mut state = self.lock_state();
        if let Some(entry) = state.queue.pop() {
            self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
            return Next::Entry(entry);
        }
        match state.lifecycle {
            Lifecycle::Stopping { .. } | Lifecycle::Stopped => Next::Shutdown,
            Lifecycle::Idle | Lifecycle::Running => Next::Wait,
        }
    }

    fn finish_entry(&self) {
        let previous = self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.lock_state().queue.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.lock_state();
        let workers_active = matches!(state.lifecycle, Lifecycle::Running | Lifecycle::Stopping { .. });
        !workers_active
            || (state.queue.is_empty() && self.counters.in_flight.load(Ordering::SeqCst) == 0)
    }

    async fn dispatch(&self, entry: QueueEntry<Arc<E>>) {
        let wait_us = u64::try_from(entry.enqueued_at.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.counters.record_dispatch(wait_us);

        let event = entry.item;
        let targets = self.read_registry().targets(&event);
        if targets.is_empty() {
            debug!(event_type = event.event_type(), "EventBus::dispatch: no subscribers");
            return;
        }

        let timeout = self.config.handler_timeout();
        let invocations = targets
            .into_iter()
            .map(|target| invoke(self.id(), target, Arc::clone(&event), timeout));

        let mut delivered = 0;
        for (target, outcome) in join_all(invocations).await {
            match outcome {
                Delivery::Delivered => delivered += 1,
                Delivery::Failed(error) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = %target.subscriber,
                        subscription = %target.id,
                        event_type = event.event_type(),
                        %error,
                        "EventBus: handler failed"
                    );
                }
                Delivery::TimedOut => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = %target.subscriber,
                        subscription = %target.id,
                        event_type = event.event_type(),
                        ?timeout,
                        "EventBus: handler timed out"
                    );
                }
            }
        }
        self.counters.record_delivered(event.event_type(), delivered);
    }
}

/// Run one handler in its own task under `timeout`
async fn invoke<E: BusEvent>(
    bus_id: usize,
    target: Target<E>,
    event: Arc<E>,
    timeout: Duration,
) -> (Target<E>, Delivery) {
    let handler = Arc::clone(&target.handler);
    let mut task = tokio::spawn(DISPATCHING.scope(bus_id, async move { handler.handle(event).await }));

    let outcome = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Delivery::Delivered,
        Ok(Ok(Err(err))) => Delivery::Failed(format!("{:#}", err)),
        Ok(Err(join_err)) if join_err.is_panic() => Delivery::Failed("handler panicked".to_string()),
        Ok(Err(_)) => Delivery::Failed("handler task cancelled".to_string()),
        Err(_) => {
            // Abandon the invocation; its side effects are the handler's concern
            task.abort();
            Delivery::TimedOut
        }
    };
    (target, outcome)
}

async fn run_worker<E: BusEvent>(shared: Arc<Shared<E>>, worker: usize) {
    debug!(worker, "EventBus worker: started");
    loop {
        let notified = shared.work.notified();
        tokio::pin!(notified);
        // Register before inspecting the queue so a concurrent publish or stop is not missed
        notified.as_mut().enable();

        match shared.next_entry() {
            Next::Entry(entry) => {
                shared.dispatch(entry).await;
                shared.finish_entry();
            }
            Next::Wait => notified.await,
            Next::Shutdown => break,
        }
    }
    debug!(worker, "EventBus worker: exiting");
}

/// Asynchronous priority event bus
///
/// Construct once per server (or per test) and share behind an `Arc`.
/// See the crate docs for delivery guarantees.
pub struct EventBus<E: BusEvent> {
    shared: Arc<Shared<E>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: BusEvent> EventBus<E> {
    /// Create a bus; workers are not started until [`EventBus::start`]
    pub fn new(config: BusConfig) -> Self {
        debug!(?config, "EventBus::new: creating event bus");
        let queue = PriorityQueue::new(config.capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState {
                    queue,
                    lifecycle: Lifecycle::Idle,
                }),
                registry: RwLock::new(Registry::new()),
                counters: Counters::default(),
                work: Notify::new(),
                idle: Notify::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Queue an event for delivery
    ///
    /// Never blocks and never runs handlers on the caller. Returns `Ok(true)`
    /// if the event was queued and `Ok(false)` if the overflow policy dropped
    /// it. Once a stop has begun publishes fail with [`BusError::Closed`],
    /// except that during a draining stop this bus's own handlers may still
    /// publish; those events are delivered before the workers exit.
    pub fn publish(&self, event: E) -> Result<bool, BusError> {
        let priority = event.priority();
        let mut state = self.shared.lock_state();
        let closed = match state.lifecycle {
            Lifecycle::Idle | Lifecycle::Running => false,
            Lifecycle::Stopping { drain } => !(drain && self.shared.is_dispatching()),
            Lifecycle::Stopped => true,
        };
        if closed {
            debug!(event_type = event.event_type(), "EventBus::publish: bus closed");
            return Err(BusError::Closed);
        }

        debug!(event_type = event.event_type(), %priority, "EventBus::publish");
        self.shared
            .counters
            .published
            .fetch_add(1, Ordering::Relaxed);
        let outcome = state
            .queue
            .push(Arc::new(event), priority, self.shared.config.overflow);
        let depth = state.queue.len();
        drop(state);

        match outcome {
            PushOutcome::Queued => {
                self.shared.counters.record_depth(depth);
                self.shared.work.notify_one();
                Ok(true)
            }
            PushOutcome::Displaced(evicted) => {
                self.shared
                    .counters
                    .dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    evicted_type = evicted.item.event_type(),
                    evicted_priority = %evicted.priority,
                    "EventBus: queue full, evicted oldest low-priority event"
                );
                self.shared.work.notify_one();
                Ok(true)
            }
            PushOutcome::Dropped(event) => {
                self.shared
                    .counters
                    .dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = event.event_type(),
                    capacity = self.shared.config.capacity,
                    "EventBus: queue full, dropped event"
                );
                Ok(false)
            }
        }
    }

    /// Subscribe `handler` to events whose type matches `pattern`
    pub fn subscribe<H>(&self, pattern: &str, handler: H) -> Result<SubscriptionId, BusError>
    where
        H: EventHandler<E> + 'static,
    {
        self.subscribe_with(SubscribeOptions::new("anonymous", pattern), handler)
    }

    /// Subscribe with a subscriber name and priority-of-interest
    pub fn subscribe_with<H>(&self, options: SubscribeOptions, handler: H) -> Result<SubscriptionId, BusError>
    where
        H: EventHandler<E> + 'static,
    {
        let pattern = EventPattern::parse(&options.pattern)?;
        let id = self.shared.write_registry().insert(
            options.subscriber.clone(),
            pattern,
            options.min_priority,
            Arc::new(handler),
        );
        debug!(
            subscriber = %options.subscriber,
            pattern = %options.pattern,
            min_priority = %options.min_priority,
            subscription = %id,
            "EventBus::subscribe: registered"
        );
        Ok(id)
    }

    /// Remove a subscription
    ///
    /// Deliveries already dispatched to the handler are not cancelled.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        match self.shared.write_registry().remove(id) {
            Some(sub) => {
                debug!(subscription = %id, subscriber = %sub.subscriber, "EventBus::unsubscribe: removed");
                Ok(())
            }
            None => Err(BusError::UnknownSubscription(id)),
        }
    }

    /// Spawn the worker tasks on the current tokio runtime
    pub fn start(&self) -> Result<(), BusError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        {
            let mut state = self.shared.lock_state();
            match state.lifecycle {
                Lifecycle::Running => return Err(BusError::AlreadyRunning),
                Lifecycle::Stopping { .. } | Lifecycle::Stopped => return Err(BusError::Closed),
                Lifecycle::Idle => state.lifecycle = Lifecycle::Running,
            }
        }

        let count = self.shared.config.workers.max(1);
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in 0..count {
            workers.push(runtime.spawn(run_worker(Arc::clone(&self.shared), worker)));
        }
        info!(workers = count, capacity = self.shared.config.capacity, "EventBus started");
        Ok(())
    }

    /// Stop the workers
    ///
    /// With `drain` the workers deliver everything still queued, including
    /// events the handlers publish meanwhile, before exiting; without it the
    /// queue is discarded. Handler invocations already
    /// in flight run to completion or timeout either way.
    pub async fn stop(&self, drain: bool) -> Result<(), BusError> {
        {
            let mut state = self.shared.lock_state();
            if state.lifecycle != Lifecycle::Running {
                return Err(BusError::NotRunning);
            }
            state.lifecycle = Lifecycle::Stopping { drain };
            if !drain {
                let discarded = state.queue.clear();
                self.shared
                    .counters
                    .discarded
                    .fetch_add(discarded as u64, Ordering::Relaxed);
                debug!(discarded, "EventBus::stop: discarded queued events");
            }
        }
        self.shared.work.notify_waiters();

        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "EventBus::stop: worker ended abnormally");
            }
        }

        self.shared.lock_state().lifecycle = Lifecycle::Stopped;
        self.shared.idle.notify_waiters();
        info!(drain, "EventBus stopped");
        Ok(())
    }

    /// Resolve once nothing is queued or in flight
    ///
    /// Returns immediately when no workers are running, since the queue
    /// cannot change on its own then.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Whether workers are currently running
    pub fn is_running(&self) -> bool {
        self.shared.lock_state().lifecycle == Lifecycle::Running
    }

    /// Current delivery statistics
    pub fn statistics(&self) -> BusStats {
        let (depth, running) = {
            let state = self.shared.lock_state();
            (state.queue.len(), state.lifecycle == Lifecycle::Running)
        };
        let subscribers = self.shared.read_registry().len();
        self.shared.counters.snapshot(depth, subscribers, running)
    }
}

impl<E: BusEvent> Drop for EventBus<E> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock_state();
            state.lifecycle = Lifecycle::Stopped;
        }
        let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in workers.drain(..) {
            handle.abort();
        }
    }
}
