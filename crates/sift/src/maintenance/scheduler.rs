//! Periodic maintenance scheduler.
//!
//! Enqueues the stuck-job reaper and retention tasks at their configured
//! intervals, and fires periodic update and ingestor triggers when due.
//! A manual trigger on the broadcast channel forces an immediate tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::TriggerTask;
use crate::broker::{Broker, QueueRouter, Task};
use crate::config::Settings;
use crate::db::{trigger_repo, Database};
use crate::error::{TaskError, WorkerError};

#[derive(Debug, Default)]
struct LastRuns {
    stuck_check: Option<DateTime<Utc>>,
    retention: Option<DateTime<Utc>>,
}

pub struct MaintenanceScheduler {
    db: Database,
    broker: Arc<dyn Broker>,
    router: QueueRouter,
    settings: Arc<Settings>,
    last_runs: Arc<Mutex<LastRuns>>,
    shutdown: Arc<AtomicBool>,
}

impl MaintenanceScheduler {
    pub fn new(db: Database, broker: Arc<dyn Broker>, settings: Arc<Settings>) -> Self {
        Self {
            router: QueueRouter::from_settings(&settings),
            db,
            broker,
            settings,
            last_runs: Arc::new(Mutex::new(LastRuns::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues everything due at `now`. Returns the number of tasks enqueued.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize, TaskError> {
        tick(
            &self.db,
            self.broker.as_ref(),
            &self.router,
            &self.settings,
            &self.last_runs,
            now,
        )
    }

    /// Start the maintenance loop in a background thread.
    /// Accepts a trigger receiver for manual ticks.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>, WorkerError> {
        let db = self.db.clone();
        let broker = Arc::clone(&self.broker);
        let router = self.router.clone();
        let settings = Arc::clone(&self.settings);
        let last_runs = Arc::clone(&self.last_runs);
        let shutdown = Arc::clone(&self.shutdown);
        let period = settings.maintenance.tick();

        std::thread::Builder::new()
            .name("maintenance".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("Maintenance scheduler could not start a runtime: {}", e);
                        return;
                    }
                };

                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(period);
                    interval_timer.tick().await; // skip immediate first tick

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::info!("Manual maintenance tick triggered");
                            },
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        match tick(&db, broker.as_ref(), &router, &settings, &last_runs, Utc::now()) {
                            Ok(0) => {}
                            Ok(n) => log::debug!("Maintenance tick enqueued {} task(s)", n),
                            Err(e) => log::error!("Maintenance tick failed: {}", e),
                        }
                    }
                });
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn interval_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, period: std::time::Duration) -> bool {
    match last {
        None => true,
        Some(last) => (now - last).num_seconds() >= period.as_secs() as i64,
    }
}

fn tick(
    db: &Database,
    broker: &dyn Broker,
    router: &QueueRouter,
    settings: &Settings,
    last_runs: &Mutex<LastRuns>,
    now: DateTime<Utc>,
) -> Result<usize, TaskError> {
    let mut enqueued = 0;
    let maintenance = &settings.maintenance;
    let default_queue = router.default_queue_name();

    {
        let mut last = last_runs.lock().unwrap_or_else(|e| e.into_inner());
        if interval_elapsed(last.stuck_check, now, maintenance.stuck_check_interval()) {
            broker.enqueue(
                &default_queue,
                Task::CheckStuckAnalysis {
                    minutes_ago: maintenance.stuck_minutes_ago,
                    check_pending: maintenance.check_pending,
                },
            )?;
            last.stuck_check = Some(now);
            enqueued += 1;
        }
        if interval_elapsed(last.retention, now, maintenance.retention_interval()) {
            broker.enqueue(
                &default_queue,
                Task::RemoveOldJobs {
                    retention_days: Some(settings.old_jobs_retention_days),
                },
            )?;
            last.retention = Some(now);
            enqueued += 1;
        }
    }

    for trigger in trigger_repo::list_due(db, now)? {
        if trigger.task == TriggerTask::Update && !settings.repo_downloader_enabled {
            continue;
        }

        let task = match trigger.task {
            TriggerTask::Update => Task::Update {
                config_pk: trigger.config_pk.clone(),
            },
            TriggerTask::ExecuteIngestor => Task::ExecuteIngestor {
                config_pk: trigger.config_pk.clone(),
            },
        };
        let queue = router.route(&trigger.queue);
        broker.enqueue(&queue, task)?;
        trigger_repo::mark_run(db, &trigger.name, now)?;
        log::info!("Trigger '{}' fired {} on '{}'", trigger.name, trigger.task, queue);
        enqueued += 1;
    }

    Ok(enqueued)
}
