//! Registry of tasks currently assigned to workers
//!
//! Every successful claim creates an assignment: a freshly minted id, the
//! claimed task, and a heartbeat timer. Heartbeats re-arm the timer; if it
//! fires, the assignment is discarded and the task returns to its queue,
//! where the next claim produces a new assignment id. Completed or
//! cancelled assignments are removed and their timers stopped.

use crate::multi_queue::MultiQueue;
use crate::task::Task;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors reported by registry operations
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("no assignment registered under id '{0}'")]
    UnknownAssignment(String),
}

/// A single claim of a task by a worker, bounded in time by heartbeat
/// liveness.
pub struct Assignment {
    pub task: Arc<Task>,
    /// Pending heartbeat deadline; aborted on refresh and on removal
    timer: JoinHandle<()>,
    /// Arm counter. A timer callback only acts when its epoch still matches
    /// the assignment's, so a refresh that raced an elapsed deadline wins.
    epoch: u64,
}

impl Drop for Assignment {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Table of currently-assigned tasks keyed by assignment id
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// tasks assigned to workers, assignment id -> assignment
    assignments: Mutex<HashMap<String, Assignment>>,
    /// re-enqueue target for tasks whose heartbeat deadline passed
    pending_tasks: Arc<MultiQueue<Task>>,
    heartbeat_timeout: Duration,
}

impl TaskRegistry {
    pub fn new(pending_tasks: Arc<MultiQueue<Task>>, heartbeat_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                assignments: Mutex::new(HashMap::new()),
                pending_tasks,
                heartbeat_timeout,
            }),
        }
    }

    /// Stores the task under a freshly minted assignment id and arms its
    /// heartbeat timer. The id is also recorded on the task itself so the
    /// cancellation path can find the assignment from the task.
    pub fn register(&self, task: Arc<Task>) -> String {
        let assignment_id = Uuid::new_v4().to_string();

        let mut assignments = self.inner.assignments.lock();
        task.set_assignment_id(Some(assignment_id.clone()));
        let timer = RegistryInner::spawn_timer(&self.inner, assignment_id.clone(), 0);
        assignments.insert(
            assignment_id.clone(),
            Assignment {
                task,
                timer,
                epoch: 0,
            },
        );
        drop(assignments);

        debug!(assignment_id = %assignment_id, "Task assigned");
        assignment_id
    }

    /// Re-arms the heartbeat timer of the given assignment for the full
    /// timeout. The new deadline is now + timeout regardless of how much of
    /// the previous one had elapsed.
    pub fn refresh(&self, assignment_id: &str) -> Result<(), RegistryError> {
        let mut assignments = self.inner.assignments.lock();
        let assignment = assignments
            .get_mut(assignment_id)
            .ok_or_else(|| RegistryError::UnknownAssignment(assignment_id.to_string()))?;

        assignment.epoch += 1;
        assignment.timer.abort();
        assignment.timer =
            RegistryInner::spawn_timer(&self.inner, assignment_id.to_string(), assignment.epoch);

        debug!(assignment_id = %assignment_id, "Heartbeat deadline re-armed");
        Ok(())
    }

    /// Removes and returns the assignment, stopping its timer.
    pub fn complete(&self, assignment_id: &str) -> Result<Assignment, RegistryError> {
        let assignment = self
            .inner
            .assignments
            .lock()
            .remove(assignment_id)
            .ok_or_else(|| RegistryError::UnknownAssignment(assignment_id.to_string()))?;
        Ok(assignment)
    }

    /// Number of assignments currently held by workers
    pub fn running_count(&self) -> usize {
        self.inner.assignments.lock().len()
    }
}

impl RegistryInner {
    fn spawn_timer(inner: &Arc<RegistryInner>, assignment_id: String, epoch: u64) -> JoinHandle<()> {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.heartbeat_timeout).await;
            inner.fire_timeout(&assignment_id, epoch);
        })
    }

    /// Invoked by an elapsed heartbeat timer: removes the assignment and
    /// returns its task to the pending queue. The assignment is removed
    /// from the table before the task is re-enqueued, so no interleaving
    /// observes it in two locations.
    fn fire_timeout(&self, assignment_id: &str, epoch: u64) {
        let assignment = {
            let mut assignments = self.assignments.lock();
            match assignments.get(assignment_id) {
                // An abort can arrive after the sleep already elapsed; the
                // epoch check keeps such a stale callback from acting on a
                // refreshed assignment.
                Some(current) if current.epoch == epoch => assignments.remove(assignment_id),
                _ => None,
            }
        };

        let Some(assignment) = assignment else {
            return;
        };

        warn!(
            assignment_id = %assignment_id,
            task_type = %assignment.task.task_type,
            "Heartbeat timeout, returning task to queue"
        );

        assignment.task.set_assignment_id(None);
        self.pending_tasks
            .push(&assignment.task.task_type, Arc::clone(&assignment.task));
    }
}
