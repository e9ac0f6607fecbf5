use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::broker::{ControlCommand, LocalBroker, QueuedTask};
use crate::error::WorkerError;
use crate::orchestrator::Orchestrator;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Worker threads consuming one queue, plus the control listener that
/// receives broadcasts addressed to that queue.
///
/// The pool is one worker node with hostname `"{prefix}_{queue}"`.
pub struct WorkerPool {
    hostname: String,
    queue: String,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` task threads on `queue` (a routed queue name).
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        broker: &LocalBroker,
        queue: &str,
        worker_count: usize,
        hostname_prefix: &str,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        if hostname_prefix.is_empty() || hostname_prefix.contains('_') {
            return Err(WorkerError::InvalidHostname(hostname_prefix.to_string()));
        }

        let hostname = format!("{}_{}", hostname_prefix, queue);
        let task_rx = broker
            .receiver(queue)
            .map_err(|_| WorkerError::ChannelClosed)?;
        let control_rx = broker
            .subscribe(queue)
            .map_err(|_| WorkerError::ChannelClosed)?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count + 1);

        let control_orchestrator = Arc::clone(&orchestrator);
        let control_shutdown = Arc::clone(&shutdown);
        let control_hostname = hostname.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-control", hostname))
            .spawn(move || {
                run_control_listener(
                    control_hostname,
                    control_rx,
                    control_shutdown,
                    control_orchestrator,
                );
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
        workers.push(handle);

        for worker_id in 0..worker_count {
            let rx = task_rx.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_orchestrator = Arc::clone(&orchestrator);
            let name = format!("{}-{}", hostname, worker_id);

            let spawned = thread::Builder::new().name(name).spawn(move || {
                run_worker(worker_id, rx, shutdown_flag, worker_orchestrator);
            });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    join_all(workers);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers on '{}' as {}", worker_count, queue, hostname);

        Ok(Self {
            hostname,
            queue: queue.to_string(),
            workers,
            shutdown,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool {}...", self.hostname);
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        join_all(self.workers);
        info!("All workers of {} have stopped", self.hostname);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().unwrap_or("worker").to_string();
        if let Err(e) = worker.join() {
            error!("Thread {} panicked: {:?}", name, e);
        } else {
            debug!("Thread {} finished", name);
        }
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<QueuedTask>,
    shutdown: Arc<AtomicBool>,
    orchestrator: Arc<Orchestrator>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(task) => {
                let name = task.task.name();
                let task_id = task.task_id.clone();
                match catch_unwind(AssertUnwindSafe(|| orchestrator.execute(task))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Worker {}: task {} ({}) failed: {}", worker_id, name, task_id, e);
                    }
                    Err(_) => {
                        error!("Worker {}: task {} ({}) panicked", worker_id, name, task_id);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn run_control_listener(
    hostname: String,
    mut control_rx: broadcast::Receiver<ControlCommand>,
    shutdown: Arc<AtomicBool>,
    orchestrator: Arc<Orchestrator>,
) {
    // Subscribed before this thread started, so no broadcast sent during
    // boot sync is missed.
    orchestrator.on_worker_ready(&hostname);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match control_rx.try_recv() {
            Ok(command) => {
                debug!("{} received {:?}", hostname, command);
                orchestrator.handle_control(command);
            }
            Err(TryRecvError::Empty) => thread::sleep(POLL_INTERVAL),
            Err(TryRecvError::Lagged(missed)) => {
                warn!("{} missed {} control command(s)", hostname, missed);
            }
            Err(TryRecvError::Closed) => {
                debug!("{} control topic closed", hostname);
                break;
            }
        }
    }

    debug!("{} control listener stopped", hostname);
}
