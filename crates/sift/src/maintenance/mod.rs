//! Periodic housekeeping: stuck-job reaping, retention and trigger firing.

pub mod reaper;
pub mod retention;
pub mod scheduler;
pub mod trigger;

pub use reaper::check_stuck_analysis;
pub use retention::{delete_job, remove_old_jobs};
pub use scheduler::MaintenanceScheduler;
pub use trigger::{PeriodicUpdateTrigger, TriggerTask};
