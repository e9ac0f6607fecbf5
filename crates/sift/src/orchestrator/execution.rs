use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde_json::Value;

use crate::plugin::{Plugin, PluginError};

/// Runs `plugin.start()` on its own thread and waits at most `limit`.
///
/// A plugin that overruns is abandoned, not killed: its thread keeps running
/// until `start()` returns, and its result is discarded. Panics are caught
/// and reported as [`PluginError::Panicked`].
pub fn run_with_time_limit(
    mut plugin: Box<dyn Plugin>,
    name: &str,
    limit: Duration,
) -> Result<Value, PluginError> {
    let (tx, rx) = bounded(1);
    let thread_name = format!("plugin-{}", name);

    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| plugin.start()));
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(outcome);
        })
        .map_err(|e| PluginError::Execution(format!("failed to spawn plugin thread: {}", e)))?;

    match rx.recv_timeout(limit) {
        Ok(Ok(result)) => result,
        Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => {
            Err(PluginError::Panicked(name.to_string()))
        }
        Err(RecvTimeoutError::Timeout) => Err(PluginError::TimeLimitExceeded {
            name: name.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
