//! Bounded priority queue backing the bus
//!
//! One FIFO tier per [`Priority`]. Pops always take the front of the highest
//! non-empty tier, so entries of equal priority leave in insertion order.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::OverflowPolicy;
use crate::priority::Priority;

/// A queued item with its enqueue metadata
#[derive(Debug)]
pub struct QueueEntry<T> {
    pub item: T,
    pub priority: Priority,
    /// Monotonic insertion sequence, unique per queue
    pub seq: u64,
    pub enqueued_at: Instant,
}

/// Result of a push attempt
#[derive(Debug)]
pub enum PushOutcome<T> {
    /// Stored without displacing anything
    Queued,
    /// Stored after evicting an older, lower-or-equal priority entry
    Displaced(QueueEntry<T>),
    /// Not stored; the queue was full
    Dropped(T),
}

/// Fixed-capacity priority queue with per-tier FIFO ordering
#[derive(Debug)]
pub struct PriorityQueue<T> {
    tiers: [VecDeque<QueueEntry<T>>; Priority::COUNT],
    capacity: usize,
    len: usize,
    next_seq: u64,
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            tiers: std::array::from_fn(|_| VecDeque::new()),
            capacity,
            len: 0,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Push an item, applying `policy` if the queue is full
    pub fn push(&mut self, item: T, priority: Priority, policy: OverflowPolicy) -> PushOutcome<T> {
        let mut displaced = None;

        if self.is_full() {
            match policy {
                OverflowPolicy::DropIncoming => return PushOutcome::Dropped(item),
                OverflowPolicy::DropOldest => {
                    let lowest = self.tiers.iter().position(|tier| !tier.is_empty());
                    match lowest {
                        Some(tier) if tier <= priority.index() => {
                            displaced = self.tiers[tier].pop_front();
                            self.len -= 1;
                        }
                        // Incoming is below everything queued (or capacity is zero)
                        _ => return PushOutcome::Dropped(item),
                    }
                }
            }
        }

        let entry = QueueEntry {
            item,
            priority,
            seq: self.next_seq,
            enqueued_at: Instant::now(),
        };
        self.next_seq += 1;
        self.tiers[priority.index()].push_back(entry);
        self.len += 1;

        match displaced {
            Some(old) => PushOutcome::Displaced(old),
            None => PushOutcome::Queued,
        }
    }

    /// Remove the oldest entry of the highest non-empty tier
    pub fn pop(&mut self) -> Option<QueueEntry<T>> {
        let entry = self.tiers.iter_mut().rev().find_map(|tier| tier.pop_front())?;
        self.len -= 1;
        Some(entry)
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.len;
        for tier in &mut self.tiers {
            tier.clear();
        }
        self.len = 0;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut PriorityQueue<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.pop().map(|e| e.item)).collect()
    }

    #[test]
    fn test_higher_priority_pops_first() {
        let mut queue = PriorityQueue::new(10);
        queue.push("low", Priority::Low, OverflowPolicy::DropIncoming);
        queue.push("normal", Priority::Normal, OverflowPolicy::DropIncoming);
        queue.push("critical", Priority::Critical, OverflowPolicy::DropIncoming);
        queue.push("high", Priority::High, OverflowPolicy::DropIncoming);

        assert_eq!(drain(&mut queue), vec!["critical", "high", "normal", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_same_priority_is_fifo() {
        let mut queue = PriorityQueue::new(10);
        for item in ["first", "second", "third"] {
            queue.push(item, Priority::Normal, OverflowPolicy::DropIncoming);
        }
        assert_eq!(drain(&mut queue), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut queue = PriorityQueue::new(4);
        queue.push("a", Priority::Low, OverflowPolicy::DropIncoming);
        queue.push("b", Priority::High, OverflowPolicy::DropIncoming);

        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert_eq!(first.item, "b");
        assert!(first.seq > second.seq);
    }

    #[test]
    fn test_drop_incoming_when_full() {
        let mut queue = PriorityQueue::new(2);
        assert!(matches!(queue.push("a", Priority::Normal, OverflowPolicy::DropIncoming), PushOutcome::Queued));
        assert!(matches!(queue.push("b", Priority::Normal, OverflowPolicy::DropIncoming), PushOutcome::Queued));

        let outcome = queue.push("c", Priority::Critical, OverflowPolicy::DropIncoming);
        assert!(matches!(outcome, PushOutcome::Dropped("c")));
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&mut queue), vec!["a", "b"]);
    }

    #[test]
    fn test_drop_oldest_evicts_lowest_tier_first() {
        let mut queue = PriorityQueue::new(3);
        queue.push("normal-1", Priority::Normal, OverflowPolicy::DropOldest);
        queue.push("low-1", Priority::Low, OverflowPolicy::DropOldest);
        queue.push("low-2", Priority::Low, OverflowPolicy::DropOldest);

        match queue.push("high", Priority::High, OverflowPolicy::DropOldest) {
            PushOutcome::Displaced(old) => assert_eq!(old.item, "low-1"),
            other => panic!("Expected displacement, got {:?}", other),
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&mut queue), vec!["high", "normal-1", "low-2"]);
    }

    #[test]
    fn test_drop_oldest_drops_incoming_below_all_tiers() {
        let mut queue = PriorityQueue::new(2);
        queue.push("a", Priority::High, OverflowPolicy::DropOldest);
        queue.push("b", Priority::Normal, OverflowPolicy::DropOldest);

        let outcome = queue.push("c", Priority::Low, OverflowPolicy::DropOldest);
        assert!(matches!(outcome, PushOutcome::Dropped("c")));
        assert_eq!(drain(&mut queue), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let mut queue = PriorityQueue::new(0);
        assert!(matches!(queue.push("a", Priority::Critical, OverflowPolicy::DropOldest), PushOutcome::Dropped("a")));
        assert!(matches!(queue.push("b", Priority::Low, OverflowPolicy::DropIncoming), PushOutcome::Dropped("b")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_reports_removed() {
        let mut queue = PriorityQueue::new(5);
        queue.push("a", Priority::Low, OverflowPolicy::DropIncoming);
        queue.push("b", Priority::High, OverflowPolicy::DropIncoming);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
