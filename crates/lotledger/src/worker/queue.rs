use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::sync;
use crate::worker::job::Priority;

/// Blocking hand-off of job ids to workers.
pub trait JobQueue: Send + Sync {
    fn push(&self, job_id: &str, priority: Priority);

    /// Waits up to `timeout` for the next job id.
    fn pop(&self, timeout: Duration) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    priority: Priority,
    sequence: u64,
    job_id: String,
}

impl Ord for Entry {
    /// Higher priority first, then lower sequence (FIFO).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next_sequence: u64,
}

/// In-process priority queue: tiers first, FIFO by enqueue order within a
/// tier.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for MemoryQueue {
    fn push(&self, job_id: &str, priority: Priority) {
        let mut state = sync::lock(&self.state, "job queue");
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(Entry {
            priority,
            sequence,
            job_id: job_id.to_string(),
        });
        drop(state);
        self.available.notify_one();
    }

    fn pop(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut state = sync::lock(&self.state, "job queue");

        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.job_id);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            state = match self.available.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => {
                    log::warn!("job queue lock was poisoned, recovering");
                    poisoned.into_inner().0
                }
            };
        }
    }

    fn len(&self) -> usize {
        sync::lock(&self.state, "job queue").heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_priority_then_fifo() {
        let queue = MemoryQueue::new();
        queue.push("low-1", Priority::Low);
        queue.push("normal-1", Priority::Normal);
        queue.push("high-1", Priority::High);
        queue.push("normal-2", Priority::Normal);
        queue.push("high-2", Priority::High);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop(Duration::ZERO)).collect();
        assert_eq!(order, vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let started = Instant::now();
        assert_eq!(queue.pop(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push("job-1", Priority::Normal);

        assert_eq!(consumer.join().unwrap(), Some("job-1".to_string()));
    }
}
