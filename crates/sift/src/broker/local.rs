use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::broadcast;

use super::{Broker, ControlCommand, QueuedTask, Task};
use crate::error::TaskError;

const CONTROL_CAPACITY: usize = 64;

struct WorkQueue {
    sender: Sender<QueuedTask>,
    receiver: Receiver<QueuedTask>,
}

/// In-process broker.
///
/// Work queues are crossbeam channels, so each task is taken by exactly one
/// consumer. Control topics are tokio broadcast channels, so each command
/// reaches every subscriber of the queue. Both are created on first use.
#[derive(Default)]
pub struct LocalBroker {
    queues: Mutex<HashMap<String, WorkQueue>>,
    topics: Mutex<HashMap<String, broadcast::Sender<ControlCommand>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer handle for a work queue. Clones share the queue.
    pub fn receiver(&self, queue: &str) -> Result<Receiver<QueuedTask>, TaskError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| TaskError::QueueClosed(queue.to_string()))?;
        let entry = queues.entry(queue.to_string()).or_insert_with(|| {
            let (sender, receiver) = unbounded();
            WorkQueue { sender, receiver }
        });
        Ok(entry.receiver.clone())
    }

    /// Subscribes to a queue's control topic. Only commands broadcast after
    /// this call are delivered.
    pub fn subscribe(&self, queue: &str) -> Result<broadcast::Receiver<ControlCommand>, TaskError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| TaskError::QueueClosed(queue.to_string()))?;
        let sender = topics
            .entry(queue.to_string())
            .or_insert_with(|| broadcast::channel(CONTROL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    /// Tasks waiting on `queue`.
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(queue).map(|q| q.receiver.len()))
            .unwrap_or(0)
    }
}

impl Broker for LocalBroker {
    fn enqueue(&self, queue: &str, task: Task) -> Result<String, TaskError> {
        let queued = QueuedTask::new(task);
        let task_id = queued.task_id.clone();

        let sender = {
            let mut queues = self
                .queues
                .lock()
                .map_err(|_| TaskError::QueueClosed(queue.to_string()))?;
            queues
                .entry(queue.to_string())
                .or_insert_with(|| {
                    let (sender, receiver) = unbounded();
                    WorkQueue { sender, receiver }
                })
                .sender
                .clone()
        };

        log::debug!("Enqueued {} ({}) on '{}'", queued.task.name(), task_id, queue);
        sender
            .send(queued)
            .map_err(|_| TaskError::QueueClosed(queue.to_string()))?;
        Ok(task_id)
    }

    fn broadcast(&self, queue: &str, command: ControlCommand) -> Result<usize, TaskError> {
        let topics = self
            .topics
            .lock()
            .map_err(|_| TaskError::QueueClosed(queue.to_string()))?;
        let Some(sender) = topics.get(queue) else {
            log::debug!("No subscribers on '{}', dropping {:?}", queue, command);
            return Ok(0);
        };
        // A send error only means there are no live receivers.
        Ok(sender.send(command).unwrap_or(0))
    }
}

impl std::fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues: Vec<String> = self
            .queues
            .lock()
            .map(|q| q.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("LocalBroker").field("queues", &queues).finish()
    }
}
