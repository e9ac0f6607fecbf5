//! Stuck-job reaping, retention and scheduled triggers.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::TestHarness;
use sift::broker::Task;
use sift::db::{job_repo, trigger_repo};
use sift::job::{Artifact, JobStatus, JobSubmitter, NewJob};
use sift::maintenance::{MaintenanceScheduler, PeriodicUpdateTrigger, TriggerTask};
use sift::plugin::{PluginConfig, PluginKind};
use sift::{Broker, QueuedTask};

#[test]
fn test_reaper_fails_jobs_stuck_mid_pipeline() {
    let h = TestHarness::new();
    h.add_plugin("Hang", PluginKind::Analyzer, json!({}));

    let submitter = JobSubmitter::new(h.db.clone(), h.blobs.clone());
    let job_id = submitter
        .submit_at(
            NewJob::observable("10.0.0.1", "ip", &["Hang"]),
            Utc::now() - ChronoDuration::minutes(40),
        )
        .unwrap()
        .job_id();
    h.orchestrator
        .schedule(Task::JobPipeline {
            job_id,
            runtime_configuration: Default::default(),
        })
        .unwrap();
    h.drain("default"); // pipeline only; the plugin task is never run
    assert!(h.orchestrator.tracker().is_tracked(job_id));

    h.orchestrator
        .execute(QueuedTask::new(Task::CheckStuckAnalysis {
            minutes_ago: 25,
            check_pending: false,
        }))
        .unwrap();

    assert_eq!(h.job(job_id).status, JobStatus::Failed);
    assert!(!h.orchestrator.tracker().is_tracked(job_id));

    // The late report lands but cannot move the job out of its final status.
    h.run_until_idle("default");
    assert_eq!(h.job(job_id).status, JobStatus::Failed);
}

#[test]
fn test_retention_removes_jobs_and_samples() {
    let h = TestHarness::new();
    let submitter = JobSubmitter::new(h.db.clone(), h.blobs.clone());
    let now = Utc::now();

    let old = submitter
        .submit_at(NewJob::file("dropper.bin", vec![0x4d, 0x5a, 1, 2, 3], &[]), now - ChronoDuration::days(40))
        .unwrap()
        .job_id();
    let state = h.orchestrator.state_machine();
    state.set_final_status_at(old, now - ChronoDuration::days(39)).unwrap();

    let blob = match h.job(old).artifact {
        Artifact::File { path, .. } => h.blobs.resolve(&path).unwrap(),
        other => panic!("expected a file artifact, got {:?}", other),
    };
    assert!(blob.exists());

    h.orchestrator
        .execute(QueuedTask::new(Task::RemoveOldJobs { retention_days: None }))
        .unwrap();

    assert!(job_repo::find_by_id(&h.db, old).unwrap().is_none());
    assert!(!blob.exists());
}

#[test]
fn test_scheduler_tick_feeds_workers() {
    let h = TestHarness::new();
    let mut ingestor = PluginConfig::new("Feed", PluginKind::Ingestor, common::SCRIPTED_PATH);
    ingestor.params.insert("sleep_ms".to_string(), json!(1));
    h.add_config(&ingestor);
    trigger_repo::insert(
        &h.db,
        &PeriodicUpdateTrigger::new(
            "feed_every_hour",
            TriggerTask::ExecuteIngestor,
            "Feed",
            "default",
            Duration::from_secs(3600),
        ),
    )
    .unwrap();

    let scheduler = MaintenanceScheduler::new(
        h.db.clone(),
        std::sync::Arc::clone(&h.broker) as std::sync::Arc<dyn Broker>,
        std::sync::Arc::new(h.orchestrator.settings().clone()),
    );
    assert_eq!(scheduler.tick(Utc::now()).unwrap(), 3);
    assert_eq!(h.drain("default"), 3);

    let trigger = trigger_repo::find_by_name(&h.db, "feed_every_hour").unwrap().unwrap();
    assert!(trigger.last_run_at.is_some());
    assert_eq!(scheduler.tick(Utc::now()).unwrap(), 0);
}
