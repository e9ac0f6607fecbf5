//! Task transport: named work queues plus per-queue control topics.

pub mod local;
pub mod router;
pub mod task;

pub use local::LocalBroker;
pub use router::QueueRouter;
pub use task::{ControlCommand, QueuedTask, Task};

use crate::error::TaskError;

/// Queue every plugin without a usable queue of its own lands on. Worker
/// boot sync only seeds datasets from workers serving this queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Where orchestration hands work off.
pub trait Broker: Send + Sync {
    /// Puts `task` on `queue` for exactly one consumer. Returns the task id.
    fn enqueue(&self, queue: &str, task: Task) -> Result<String, TaskError>;

    /// Delivers `command` to every current subscriber of `queue`'s control
    /// topic. Returns how many received it; zero subscribers is not an error.
    fn broadcast(&self, queue: &str, command: ControlCommand) -> Result<usize, TaskError>;
}
