//! Integration tests for the event bus
//!
//! These exercise delivery, ordering, overflow and isolation through the
//! public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use eventbus::{
    BusConfig, BusError, BusEvent, EventBus, EventHandler, OverflowPolicy, Priority, SubscribeOptions, handler_fn,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct TestEvent {
    kind: String,
    priority: Priority,
    seq: usize,
}

impl TestEvent {
    fn new(kind: &str, seq: usize) -> Self {
        Self {
            kind: kind.to_string(),
            priority: Priority::Normal,
            seq,
        }
    }

    fn with_priority(kind: &str, seq: usize, priority: Priority) -> Self {
        Self {
            kind: kind.to_string(),
            priority,
            seq,
        }
    }
}

impl BusEvent for TestEvent {
    fn event_type(&self) -> &str {
        &self.kind
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}

/// Records the sequence numbers it receives
fn recorder() -> (Arc<Mutex<Vec<usize>>>, impl EventHandler<TestEvent> + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |e: &TestEvent| {
        sink.lock().unwrap().push(e.seq);
        Ok(())
    });
    (seen, handler)
}

async fn settle(bus: &EventBus<TestEvent>) {
    tokio::time::timeout(Duration::from_secs(5), bus.wait_idle())
        .await
        .expect("bus should go idle within 5s");
}

/// Sleeps far past any reasonable handler timeout
struct SlowHandler;

#[async_trait]
impl EventHandler<TestEvent> for SlowHandler {
    async fn handle(&self, _event: Arc<TestEvent>) -> eyre::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_publish_without_subscribers() {
    let bus = EventBus::new(BusConfig::with_capacity(100));
    bus.start().unwrap();

    for seq in 0..25 {
        assert_eq!(bus.publish(TestEvent::new("request.started", seq)), Ok(true));
    }
    settle(&bus).await;

    let stats = bus.statistics();
    assert_eq!(stats.published, 25);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.queue_depth, 0);
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_single_subscriber_receives_all_in_order() {
    let bus = EventBus::new(BusConfig::with_capacity(1_000));
    let (seen, handler) = recorder();
    bus.subscribe("request.completed", handler).unwrap();
    bus.start().unwrap();

    for seq in 0..200 {
        bus.publish(TestEvent::new("request.completed", seq)).unwrap();
    }
    settle(&bus).await;

    assert_eq!(*seen.lock().unwrap(), (0..200).collect::<Vec<_>>());
    let stats = bus.statistics();
    assert_eq!(stats.delivered, 200);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.deliveries_by_type.get("request.completed"), Some(&200));
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_every_matching_subscriber_gets_a_delivery() {
    let bus = EventBus::new(BusConfig::default());
    let (all, all_handler) = recorder();
    let (streams, stream_handler) = recorder();
    let (exact, exact_handler) = recorder();
    bus.subscribe("*", all_handler).unwrap();
    bus.subscribe("stream.*", stream_handler).unwrap();
    bus.subscribe("stream.completed", exact_handler).unwrap();
    bus.start().unwrap();

    bus.publish(TestEvent::new("stream.started", 0)).unwrap();
    bus.publish(TestEvent::new("stream.completed", 1)).unwrap();
    bus.publish(TestEvent::new("cost.calculated", 2)).unwrap();
    settle(&bus).await;

    assert_eq!(*all.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*streams.lock().unwrap(), vec![0, 1]);
    assert_eq!(*exact.lock().unwrap(), vec![1]);
    assert_eq!(bus.statistics().delivered, 6);
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_priority_tiers_drain_first() {
    let bus = EventBus::new(BusConfig::default());
    let (seen, handler) = recorder();
    bus.subscribe("*", handler).unwrap();

    // Queue everything before the worker starts so ordering is decided by the queue alone
    bus.publish(TestEvent::with_priority("x", 0, Priority::Low)).unwrap();
    bus.publish(TestEvent::with_priority("x", 1, Priority::Normal)).unwrap();
    bus.publish(TestEvent::with_priority("x", 2, Priority::Critical)).unwrap();
    bus.publish(TestEvent::with_priority("x", 3, Priority::High)).unwrap();
    bus.publish(TestEvent::with_priority("x", 4, Priority::Normal)).unwrap();
    bus.publish(TestEvent::with_priority("x", 5, Priority::Critical)).unwrap();

    bus.start().unwrap();
    settle(&bus).await;

    assert_eq!(*seen.lock().unwrap(), vec![2, 5, 3, 1, 4, 0]);
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_min_priority_subscription() {
    let bus = EventBus::new(BusConfig::default());
    let (seen, handler) = recorder();
    bus.subscribe_with(
        SubscribeOptions::new("pager", "*").min_priority(Priority::High),
        handler,
    )
    .unwrap();
    bus.start().unwrap();

    bus.publish(TestEvent::with_priority("cache.hit", 0, Priority::Low)).unwrap();
    bus.publish(TestEvent::with_priority("error.occurred", 1, Priority::High)).unwrap();
    bus.publish(TestEvent::with_priority("request.started", 2, Priority::Normal)).unwrap();
    settle(&bus).await;

    assert_eq!(*seen.lock().unwrap(), vec![1]);
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let bus = EventBus::new(BusConfig::default());
    let (seen, handler) = recorder();
    let id = bus.subscribe("*", handler).unwrap();
    bus.start().unwrap();

    bus.publish(TestEvent::new("a", 0)).unwrap();
    settle(&bus).await;
    bus.unsubscribe(id).unwrap();
    bus.publish(TestEvent::new("a", 1)).unwrap();
    settle(&bus).await;

    assert_eq!(*seen.lock().unwrap(), vec![0]);
    assert!(matches!(bus.unsubscribe(id), Err(BusError::UnknownSubscription(_))));
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_multiple_workers_deliver_everything() {
    let bus = EventBus::new(BusConfig {
        workers: 4,
        ..Default::default()
    });
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    bus.subscribe(
        "*",
        handler_fn(move |_: &TestEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .unwrap();
    bus.start().unwrap();

    for seq in 0..500 {
        bus.publish(TestEvent::new("request.completed", seq)).unwrap();
    }
    settle(&bus).await;

    assert_eq!(count.load(Ordering::SeqCst), 500);
    assert_eq!(bus.statistics().delivered, 500);
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_publishers() {
    let bus = Arc::new(EventBus::new(BusConfig::with_capacity(10_000)));
    let (seen, handler) = recorder();
    bus.subscribe("*", handler).unwrap();
    bus.start().unwrap();

    let mut tasks = Vec::new();
    for publisher in 0..8 {
        let bus = Arc::clone(&bus);
        tasks.push(tokio::spawn(async move {
            for i in 0..100 {
                bus.publish(TestEvent::new("request.completed", publisher * 100 + i))
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    settle(&bus).await;

    let mut received = seen.lock().unwrap().clone();
    received.sort_unstable();
    assert_eq!(received, (0..800).collect::<Vec<_>>());
    assert_eq!(bus.statistics().published, 800);
    bus.stop(true).await.unwrap();
}

// =============================================================================
// Overflow
// =============================================================================

#[test]
fn test_drop_incoming_counts_exact_excess() {
    let bus = EventBus::new(BusConfig::with_capacity(10));
    let mut accepted = 0;
    for seq in 0..17 {
        if bus.publish(TestEvent::new("request.started", seq)).unwrap() {
            accepted += 1;
        }
    }

    let stats = bus.statistics();
    assert_eq!(accepted, 10);
    assert_eq!(stats.published, 17);
    assert_eq!(stats.dropped, 7);
    assert_eq!(stats.queue_depth, 10);
    assert_eq!(stats.peak_queue_depth, 10);
}

#[tokio::test]
async fn test_drop_oldest_keeps_newest_high_priority() {
    let bus = EventBus::new(BusConfig {
        capacity: 3,
        overflow: OverflowPolicy::DropOldest,
        ..Default::default()
    });
    let (seen, handler) = recorder();
    bus.subscribe("*", handler).unwrap();

    bus.publish(TestEvent::with_priority("t", 0, Priority::Low)).unwrap();
    bus.publish(TestEvent::with_priority("t", 1, Priority::Low)).unwrap();
    bus.publish(TestEvent::with_priority("t", 2, Priority::Normal)).unwrap();
    // Full: evicts seq 0, the oldest low-priority entry
    assert_eq!(bus.publish(TestEvent::with_priority("t", 3, Priority::High)), Ok(true));
    assert_eq!(bus.statistics().dropped, 1);

    bus.start().unwrap();
    settle(&bus).await;
    assert_eq!(*seen.lock().unwrap(), vec![3, 2, 1]);
    bus.stop(true).await.unwrap();
}

proptest! {
    #[test]
    fn prop_queue_never_exceeds_capacity(capacity in 0usize..64, count in 0usize..160) {
        let bus = EventBus::new(BusConfig::with_capacity(capacity));
        for seq in 0..count {
            let _ = bus.publish(TestEvent::new("request.started", seq));
        }
        let stats = bus.statistics();
        prop_assert_eq!(stats.published, count as u64);
        prop_assert_eq!(stats.queue_depth, count.min(capacity));
        prop_assert_eq!(stats.dropped, count.saturating_sub(capacity) as u64);
    }
}

// =============================================================================
// Isolation
// =============================================================================

#[tokio::test]
async fn test_failing_handler_does_not_block_others() {
    let bus = EventBus::new(BusConfig::default());
    bus.subscribe(
        "request.completed",
        handler_fn(|e: &TestEvent| eyre::bail!("cannot handle {}", e.seq)),
    )
    .unwrap();
    let (seen, handler) = recorder();
    bus.subscribe("request.completed", handler).unwrap();
    bus.start().unwrap();

    for seq in 0..10 {
        bus.publish(TestEvent::new("request.completed", seq)).unwrap();
    }
    settle(&bus).await;

    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    let stats = bus.statistics();
    assert_eq!(stats.delivered, 10);
    assert_eq!(stats.failed, 10);
    assert_eq!(stats.timed_out, 0);
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let bus = EventBus::new(BusConfig::default());
    bus.subscribe(
        "*",
        handler_fn(|_: &TestEvent| -> eyre::Result<()> { panic!("handler bug") }),
    )
    .unwrap();
    let (seen, handler) = recorder();
    bus.subscribe("*", handler).unwrap();
    bus.start().unwrap();

    bus.publish(TestEvent::new("a", 0)).unwrap();
    bus.publish(TestEvent::new("a", 1)).unwrap();
    settle(&bus).await;

    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(bus.statistics().failed, 2);
    assert!(bus.is_running());
    bus.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_slow_handler_times_out() {
    let bus = EventBus::new(BusConfig {
        handler_timeout_ms: 50,
        ..Default::default()
    });
    bus.subscribe("*", SlowHandler).unwrap();
    let (seen, handler) = recorder();
    bus.subscribe("*", handler).unwrap();
    bus.start().unwrap();

    bus.publish(TestEvent::new("stream.token", 7)).unwrap();
    settle(&bus).await;

    let stats = bus.statistics();
    assert_eq!(*seen.lock().unwrap(), vec![7]);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.timed_out, 1);
    bus.stop(true).await.unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_stop_with_drain_delivers_queued() {
    let bus = EventBus::new(BusConfig::default());
    let (seen, handler) = recorder();
    bus.subscribe("*", handler).unwrap();
    for seq in 0..50 {
        bus.publish(TestEvent::new("a", seq)).unwrap();
    }

    bus.start().unwrap();
    bus.stop(true).await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 50);
    let stats = bus.statistics();
    assert_eq!(stats.discarded, 0);
    assert!(!stats.running);
}

#[tokio::test]
async fn test_stop_without_drain_discards_queued() {
    let bus = EventBus::new(BusConfig::default());
    bus.subscribe("*", GateHandler).unwrap();
    for seq in 0..5 {
        bus.publish(TestEvent::new("a", seq)).unwrap();
    }

    // The worker holds the first event in its handler while the rest stay queued
    bus.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.stop(false).await.unwrap();

    let stats = bus.statistics();
    assert_eq!(stats.discarded, 4);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(bus.publish(TestEvent::new("a", 5)), Err(BusError::Closed));
}

#[tokio::test]
async fn test_stop_with_drain_delivers_follow_up_events() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));
    bus.subscribe(
        "a",
        Republisher {
            bus: Arc::downgrade(&bus),
            delay: Duration::ZERO,
        },
    )
    .unwrap();
    let (seen, handler) = recorder();
    bus.subscribe("b", handler).unwrap();
    for seq in 0..3 {
        bus.publish(TestEvent::new("a", seq)).unwrap();
    }

    bus.start().unwrap();
    bus.stop(true).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    let stats = bus.statistics();
    assert_eq!(stats.published, 6);
    assert_eq!(stats.delivered, 6);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_stop_without_drain_rejects_follow_up_events() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));
    bus.subscribe(
        "a",
        Republisher {
            bus: Arc::downgrade(&bus),
            delay: Duration::from_millis(100),
        },
    )
    .unwrap();
    bus.publish(TestEvent::new("a", 0)).unwrap();

    bus.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.stop(false).await.unwrap();

    let stats = bus.statistics();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_outside_publish_rejected_while_draining() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));
    bus.subscribe("*", GateHandler).unwrap();
    bus.publish(TestEvent::new("a", 0)).unwrap();

    bus.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stopper = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.stop(true).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(bus.publish(TestEvent::new("a", 1)), Err(BusError::Closed));
    stopper.await.unwrap().unwrap();
    assert_eq!(bus.statistics().delivered, 1);
}

/// Holds each delivery briefly
struct GateHandler;

#[async_trait]
impl EventHandler<TestEvent> for GateHandler {
    async fn handle(&self, _event: Arc<TestEvent>) -> eyre::Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}

/// Publishes a "b" event for every event it handles
struct Republisher {
    bus: Weak<EventBus<TestEvent>>,
    delay: Duration,
}

#[async_trait]
impl EventHandler<TestEvent> for Republisher {
    async fn handle(&self, event: Arc<TestEvent>) -> eyre::Result<()> {
        tokio::time::sleep(self.delay).await;
        if let Some(bus) = self.bus.upgrade() {
            bus.publish(TestEvent::new("b", event.seq))?;
        }
        Ok(())
    }
}
