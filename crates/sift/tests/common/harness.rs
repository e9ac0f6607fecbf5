//! Test harness for isolated orchestration.
//!
//! The `TestHarness` owns a temp directory holding the SQLite file and the
//! blob store, a local broker and an orchestrator wired to both. Tasks can be
//! drained synchronously or handed to real worker pools.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tempfile::TempDir;

use sift::broker::{Broker, LocalBroker, Task};
use sift::config::Settings;
use sift::db::{job_repo, plugin_repo, report_repo, Database};
use sift::job::{Job, JobId, JobStatus, JobSubmitter, NewJob};
use sift::plugin::{PluginConfig, PluginKind, PluginRegistry, PluginReport};
use sift::storage::BlobStore;
use sift::{Orchestrator, WorkerPool};

use super::plugins::{CountingUpdaterClass, ScriptedClass, COUNTING_PATH, SCRIPTED_PATH};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub broker: Arc<LocalBroker>,
    pub orchestrator: Arc<Orchestrator>,
    pub blobs: BlobStore,
    pub counting: Arc<CountingUpdaterClass>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("sift.db")).expect("Failed to open database");
        let blobs = BlobStore::new(temp_dir.path().join("media"));

        let counting = Arc::new(CountingUpdaterClass::default());
        let mut registry = PluginRegistry::with_builtins();
        registry.register(SCRIPTED_PATH, Arc::new(ScriptedClass));
        registry.register(COUNTING_PATH, Arc::clone(&counting) as Arc<dyn sift::plugin::PluginClass>);

        let broker = Arc::new(LocalBroker::new());
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            Arc::new(settings),
            Arc::new(registry),
            Arc::clone(&broker) as Arc<dyn Broker>,
            blobs.clone(),
        ));

        Self {
            temp_dir,
            db,
            broker,
            orchestrator,
            blobs,
            counting,
        }
    }

    /// Adds a scripted plugin config with the given params.
    pub fn add_plugin(&self, name: &str, kind: PluginKind, params: Value) -> PluginConfig {
        let mut config = PluginConfig::new(name, kind, SCRIPTED_PATH);
        if let Value::Object(map) = params {
            config.params = map;
        }
        plugin_repo::insert(&self.db, &config).expect("Failed to insert plugin config");
        config
    }

    pub fn add_config(&self, config: &PluginConfig) {
        plugin_repo::insert(&self.db, config).expect("Failed to insert plugin config");
    }

    /// Submits an observable job and enqueues its pipeline.
    pub fn start_job(&self, plugins: &[&str]) -> JobId {
        let submitter = JobSubmitter::new(self.db.clone(), self.blobs.clone());
        let job_id = submitter
            .submit(NewJob::observable("203.0.113.9", "ip", plugins))
            .expect("Failed to submit job")
            .job_id();
        self.orchestrator
            .schedule(Task::JobPipeline {
                job_id,
                runtime_configuration: HashMap::<String, Map<String, Value>>::new(),
            })
            .expect("Failed to schedule pipeline");
        job_id
    }

    /// Executes the tasks queued on `queue` right now, in this thread.
    /// Tasks they enqueue wait for the next call.
    pub fn drain(&self, queue: &str) -> usize {
        let rx = self.broker.receiver(queue).expect("Failed to get receiver");
        let queued = rx.len();
        for _ in 0..queued {
            let task = rx.try_recv().expect("queued task vanished");
            let name = task.task.name();
            if let Err(e) = self.orchestrator.execute(task) {
                panic!("task {} failed: {}", name, e);
            }
        }
        queued
    }

    /// Drains `queue` until nothing new gets enqueued.
    pub fn run_until_idle(&self, queue: &str) {
        while self.drain(queue) > 0 {}
    }

    pub fn start_pool(&self, queue: &str, workers: usize, prefix: &str) -> WorkerPool {
        WorkerPool::start(Arc::clone(&self.orchestrator), &self.broker, queue, workers, prefix)
            .expect("Failed to start worker pool")
    }

    pub fn job(&self, job_id: JobId) -> Job {
        job_repo::get(&self.db, job_id).expect("Job not found")
    }

    pub fn reports(&self, job_id: JobId) -> Vec<PluginReport> {
        report_repo::list_for_job(&self.db, job_id).expect("Failed to list reports")
    }

    /// Polls until the job is terminal or `timeout` elapses.
    pub fn wait_final(&self, job_id: JobId, timeout: Duration) -> JobStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.job(job_id).status;
            if status.is_final() || Instant::now() > deadline {
                return status;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}
