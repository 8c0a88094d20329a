//! Request lifecycle orchestration
//!
//! The broker sequences the producer -> queue -> worker -> result flow:
//! submissions enter the pending queue and suspend on their result promise,
//! claims move tasks from the queue into the assignment registry, results
//! consume the assignment and fulfill the promise. Producer disconnects are
//! handled here as well: dropping a suspended `submit` future pulls the
//! task out of whichever location currently owns it.

use crate::multi_queue::MultiQueue;
use crate::registry::{RegistryError, TaskRegistry};
use crate::task::Task;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Errors reported by broker operations
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no task of the requested types became available within the wait budget")]
    NoWork,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Orchestrates submit/claim/heartbeat/result operations over the pending
/// queue and the assignment registry.
pub struct Broker {
    pending_tasks: Arc<MultiQueue<Task>>,
    running_tasks: TaskRegistry,
}

impl Broker {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        let pending_tasks = Arc::new(MultiQueue::new());
        let running_tasks = TaskRegistry::new(Arc::clone(&pending_tasks), heartbeat_timeout);
        Self {
            pending_tasks,
            running_tasks,
        }
    }

    /// Enqueues a task and suspends until a worker delivers its result.
    ///
    /// Returns `None` when the result promise closes without a value, which
    /// only happens during shutdown. Dropping the returned future while it
    /// is suspended withdraws the task: it is removed from the pending
    /// queue, or its assignment is discarded, or, when a result post
    /// already consumed the assignment, nothing happens and the result
    /// wins.
    pub async fn submit(&self, task_type: &str, payload: serde_json::Value) -> Option<serde_json::Value> {
        let (task, result_rx) = Task::new(task_type.to_string(), payload);
        self.pending_tasks.push(task_type, Arc::clone(&task));

        let mut withdraw_on_drop = WithdrawOnDrop {
            broker: self,
            task: &task,
            armed: true,
        };
        let result = result_rx.await;
        withdraw_on_drop.armed = false;

        result.ok()
    }

    /// Pops a task of one of the given types, bounded by the wait budget,
    /// and registers it as assigned.
    ///
    /// There is no suspension point between the pop and the registration,
    /// so a concurrent withdrawal finds the task in exactly one place.
    pub async fn claim(
        &self,
        task_types: &[String],
        wait_budget: Duration,
    ) -> Result<(String, Arc<Task>), BrokerError> {
        let task = tokio::time::timeout(wait_budget, self.pending_tasks.pop(task_types))
            .await
            .map_err(|_| BrokerError::NoWork)?;

        let assignment_id = self.running_tasks.register(Arc::clone(&task));
        Ok((assignment_id, task))
    }

    /// Re-arms the heartbeat deadline of an assignment.
    pub fn heartbeat(&self, assignment_id: &str) -> Result<(), BrokerError> {
        self.running_tasks.refresh(assignment_id)?;
        Ok(())
    }

    /// Consumes the assignment and fulfills the task's result promise.
    ///
    /// A promise whose producer already went away swallows the value; the
    /// worker still observes success because the assignment was consumed.
    pub fn deliver_result(
        &self,
        assignment_id: &str,
        value: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let assignment = self.running_tasks.complete(assignment_id)?;

        // Fulfillment happens outside the registry lock.
        if !assignment.task.fulfill(value) {
            debug!(
                assignment_id = %assignment_id,
                "Result discarded, producer no longer waiting"
            );
        }
        Ok(())
    }

    /// Number of tasks queued under the given type
    pub fn queued_count(&self, task_type: &str) -> usize {
        self.pending_tasks.queued_count(task_type)
    }

    /// Number of tasks currently assigned to workers
    pub fn running_count(&self) -> usize {
        self.running_tasks.running_count()
    }
}

/// Withdraws a submitted task when the producer's request goes away.
///
/// The producer's HTTP handler future is dropped on client disconnect; this
/// guard runs inside that drop while the task may be queued, assigned, or
/// already completed, and resolves each case in that order.
struct WithdrawOnDrop<'a> {
    broker: &'a Broker,
    task: &'a Arc<Task>,
    armed: bool,
}

impl Drop for WithdrawOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // Still queued: take it out, nobody has seen it.
        if self
            .broker
            .pending_tasks
            .remove(&self.task.task_type, self.task)
            .is_ok()
        {
            debug!(task_type = %self.task.task_type, "Withdrew unclaimed task");
            return;
        }

        // Assigned: discard the assignment, stopping its heartbeat timer.
        // An unknown id means a result post consumed the assignment first
        // and the withdrawal has nothing left to do.
        if let Some(assignment_id) = self.task.assignment_id() {
            if self.broker.running_tasks.complete(&assignment_id).is_ok() {
                debug!(
                    assignment_id = %assignment_id,
                    task_type = %self.task.task_type,
                    "Withdrew assigned task"
                );
                return;
            }
        }

        // A heartbeat timeout may have moved the task back into the queue
        // between the two checks above.
        if self
            .broker
            .pending_tasks
            .remove(&self.task.task_type, self.task)
            .is_ok()
        {
            debug!(task_type = %self.task.task_type, "Withdrew re-queued task");
        }
    }
}
