//! Multiple first in, first out (FIFO) queues keyed by task type
//!
//! Producers push into the queue of their task's type; workers pop across
//! the set of types they accept. A single broadcast signal wakes every
//! consumer blocked on `pop` whenever any push happens; consumers re-scan
//! their types and suspend again if nothing matched.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

/// Errors reported by queue operations
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueueError {
    #[error("item not present in queue of type '{0}'")]
    NotPresent(String),
}

/// Multiple FIFO queues with types.
///
/// `push` never blocks and the queues are unbounded. Within a single type,
/// items are popped in push order; across types no ordering is promised and
/// ties are broken by the caller's iteration order in `pop`.
pub struct MultiQueue<T> {
    queues: Mutex<HashMap<String, VecDeque<Arc<T>>>>,
    push_event: Notify,
}

impl<T> MultiQueue<T> {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            push_event: Notify::new(),
        }
    }

    /// Appends an item to the queue of the given type and wakes all
    /// consumers currently blocked in `pop`.
    pub fn push(&self, task_type: &str, item: Arc<T>) {
        self.queues
            .lock()
            .entry(task_type.to_string())
            .or_default()
            .push_back(item);

        // Edge-triggered broadcast: only consumers already waiting are
        // woken, each re-scans independently.
        self.push_event.notify_waiters();
    }

    /// Removes and returns an item from the first non-empty queue of the
    /// given types, scanned in the caller's order. Suspends until a push
    /// makes one available.
    ///
    /// Cancel-safe: dropping the returned future while suspended leaves
    /// every queue untouched.
    pub async fn pop(&self, task_types: &[String]) -> Arc<T> {
        let notified = self.push_event.notified();
        tokio::pin!(notified);
        loop {
            // Register interest before scanning so a push landing between
            // the scan and the await is not missed.
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(task_types) {
                return item;
            }

            notified.as_mut().await;
            notified.set(self.push_event.notified());
        }
    }

    /// Non-blocking variant of `pop`
    fn try_pop(&self, task_types: &[String]) -> Option<Arc<T>> {
        let mut queues = self.queues.lock();
        for task_type in task_types {
            if let Some(queue) = queues.get_mut(task_type) {
                if let Some(item) = queue.pop_front() {
                    return Some(item);
                }
            }
        }
        None
    }

    /// Removes the given item from the queue of the given type, comparing
    /// by pointer identity.
    pub fn remove(&self, task_type: &str, item: &Arc<T>) -> Result<(), QueueError> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(task_type)
            .ok_or_else(|| QueueError::NotPresent(task_type.to_string()))?;

        let position = queue
            .iter()
            .position(|queued| Arc::ptr_eq(queued, item))
            .ok_or_else(|| QueueError::NotPresent(task_type.to_string()))?;
        queue.remove(position);
        Ok(())
    }

    /// Number of items currently queued under the given type
    pub fn queued_count(&self, task_type: &str) -> usize {
        self.queues
            .lock()
            .get(task_type)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}

impl<T> Default for MultiQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
