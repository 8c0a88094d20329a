//! Task records flowing through the router
//!
//! A task is created when a producer submits work and lives until its result
//! promise is fulfilled by a worker or the producer abandons it. At any
//! moment a task is owned by exactly one location: a pending queue slot, a
//! running assignment, or a terminal state.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A single unit of work: an opaque type keying the queue, an opaque JSON
/// payload passed through unchanged, and a single-shot result promise.
pub struct Task {
    /// Queue key supplied by the producer
    pub task_type: String,
    /// Producer-supplied JSON value, handed to the claiming worker verbatim
    pub payload: serde_json::Value,
    /// Sending half of the result promise; taken on first fulfillment
    result_tx: Mutex<Option<oneshot::Sender<serde_json::Value>>>,
    /// Assignment id while a worker holds the task, cleared when the task
    /// returns to a queue
    assignment_id: Mutex<Option<String>>,
}

impl Task {
    /// Creates a task together with the receiving half of its result promise.
    /// The caller suspends on the receiver until a worker posts a result.
    pub fn new(
        task_type: String,
        payload: serde_json::Value,
    ) -> (std::sync::Arc<Task>, oneshot::Receiver<serde_json::Value>) {
        let (result_tx, result_rx) = oneshot::channel();
        let task = std::sync::Arc::new(Task {
            task_type,
            payload,
            result_tx: Mutex::new(Some(result_tx)),
            assignment_id: Mutex::new(None),
        });
        (task, result_rx)
    }

    /// Fulfills the result promise with the given value.
    ///
    /// The promise is single-shot: the first call consumes the sender and
    /// every later call returns `false`. A `false` return also covers the
    /// case where the producer has already gone away and dropped the
    /// receiving half.
    pub fn fulfill(&self, value: serde_json::Value) -> bool {
        match self.result_tx.lock().take() {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    /// Current assignment id, if a worker holds this task
    pub fn assignment_id(&self) -> Option<String> {
        self.assignment_id.lock().clone()
    }

    pub(crate) fn set_assignment_id(&self, assignment_id: Option<String>) {
        *self.assignment_id.lock() = assignment_id;
    }
}
