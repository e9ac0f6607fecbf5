//! Staged fan-out/fan-in of job pipelines.

mod common;

use std::collections::HashMap;

use serde_json::json;

use common::TestHarness;
use sift::broker::Task;
use sift::config::Settings;
use sift::job::{FinalStatusPolicy, JobStatus, MixedOutcome};
use sift::plugin::{PluginKind, ReportStatus};

#[test]
fn test_stages_run_in_order() {
    let h = TestHarness::new();
    h.add_plugin("Whois", PluginKind::Analyzer, json!({}));
    h.add_plugin("Geo", PluginKind::Analyzer, json!({}));
    h.add_plugin("Misp", PluginKind::Connector, json!({}));
    h.add_plugin("Graph", PluginKind::Visualizer, json!({}));

    let job_id = h.start_job(&["Whois", "Geo", "Misp", "Graph"]);

    assert_eq!(h.drain("default"), 1);
    assert_eq!(h.job(job_id).status, JobStatus::AnalyzersRunning);
    assert_eq!(h.drain("default"), 2);
    assert_eq!(h.job(job_id).status, JobStatus::ConnectorsRunning);
    assert_eq!(h.reports(job_id).len(), 2);

    assert_eq!(h.drain("default"), 1);
    assert_eq!(h.job(job_id).status, JobStatus::VisualizersRunning);

    assert_eq!(h.drain("default"), 1);
    let job = h.job(job_id);
    assert_eq!(job.status, JobStatus::ReportedWithoutFails);
    assert!(job.finished_analysis_time.is_some());
    assert!(job.process_time.is_some());

    let reports = h.reports(job_id);
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| r.status == ReportStatus::Success));
    assert!(reports.iter().all(|r| r.end_time.is_some()));
}

#[test]
fn test_mixed_outcome_is_partial_by_default() {
    let h = TestHarness::new();
    h.add_plugin("Good", PluginKind::Analyzer, json!({}));
    h.add_plugin("Bad", PluginKind::Analyzer, json!({ "fail": "upstream 500" }));
    h.add_plugin("Relay", PluginKind::Connector, json!({}));

    let job_id = h.start_job(&["Good", "Bad", "Relay"]);
    h.run_until_idle("default");

    assert_eq!(h.job(job_id).status, JobStatus::ReportedWithFails);
    let bad = h
        .reports(job_id)
        .into_iter()
        .find(|r| r.config_name == "Bad")
        .unwrap();
    assert_eq!(bad.status, ReportStatus::Failed);
    assert!(bad.errors[0].contains("upstream 500"));
}

#[test]
fn test_mixed_outcome_can_fail_the_job() {
    let h = TestHarness::with_settings(Settings {
        final_status: FinalStatusPolicy {
            mixed_outcome: MixedOutcome::Failed,
        },
        ..Settings::default()
    });
    h.add_plugin("Good", PluginKind::Analyzer, json!({}));
    h.add_plugin("Bad", PluginKind::Analyzer, json!({ "fail": "nope" }));

    let job_id = h.start_job(&["Good", "Bad"]);
    h.run_until_idle("default");

    assert_eq!(h.job(job_id).status, JobStatus::Failed);
}

#[test]
fn test_panicking_plugin_fails_its_report_only() {
    let h = TestHarness::new();
    h.add_plugin("Crash", PluginKind::Analyzer, json!({ "panic": true }));
    h.add_plugin("Fine", PluginKind::Analyzer, json!({}));

    let job_id = h.start_job(&["Crash", "Fine"]);
    h.run_until_idle("default");

    assert_eq!(h.job(job_id).status, JobStatus::ReportedWithFails);
    let crash = h
        .reports(job_id)
        .into_iter()
        .find(|r| r.config_name == "Crash")
        .unwrap();
    assert_eq!(crash.status, ReportStatus::Failed);
    assert!(crash.errors[0].contains("panicked"));
}

#[test]
fn test_plugins_route_to_their_queue() {
    let h = TestHarness::with_settings(Settings {
        queues: vec!["default".to_string(), "long".to_string()],
        ..Settings::default()
    });
    let mut slow = sift::plugin::PluginConfig::new("Sandbox", PluginKind::Analyzer, common::SCRIPTED_PATH);
    slow.queue = "long".to_string();
    h.add_config(&slow);
    let mut stray = sift::plugin::PluginConfig::new("Stray", PluginKind::Analyzer, common::SCRIPTED_PATH);
    stray.queue = "unknown".to_string();
    h.add_config(&stray);

    let job_id = h.start_job(&["Sandbox", "Stray"]);
    assert_eq!(h.drain("default"), 1);
    assert_eq!(h.broker.pending("long"), 1);
    assert_eq!(h.drain("default"), 1); // stray lands on the fallback queue
    assert_eq!(h.job(job_id).status, JobStatus::AnalyzersRunning);

    assert_eq!(h.drain("long"), 1);
    assert_eq!(h.job(job_id).status, JobStatus::ReportedWithoutFails);
}

#[test]
fn test_runtime_configuration_overrides_params() {
    let h = TestHarness::new();
    h.add_plugin("Flaky", PluginKind::Analyzer, json!({}));

    let submitter = sift::JobSubmitter::new(h.db.clone(), h.blobs.clone());
    let job_id = submitter
        .submit(sift::NewJob::observable("example.org", "domain", &["Flaky"]))
        .unwrap()
        .job_id();

    let mut overrides = serde_json::Map::new();
    overrides.insert("fail".to_string(), json!("forced by caller"));
    let mut runtime = HashMap::new();
    runtime.insert("Flaky".to_string(), overrides);
    h.orchestrator
        .schedule(Task::JobPipeline {
            job_id,
            runtime_configuration: runtime,
        })
        .unwrap();

    h.run_until_idle("default");
    assert_eq!(h.job(job_id).status, JobStatus::Failed);
}

#[test]
fn test_pipeline_status_task_rejects_final_values() {
    let h = TestHarness::new();
    let job_id = h.start_job(&[]);
    let rx = h.broker.receiver("default").unwrap();
    let _pipeline = rx.try_recv().unwrap();

    let result = h.orchestrator.execute(sift::QueuedTask::new(Task::JobSetPipelineStatus {
        job_id,
        status: JobStatus::ReportedWithoutFails,
    }));
    assert!(result.is_err());
    assert_eq!(h.job(job_id).status, JobStatus::Pending);

    h.orchestrator
        .execute(sift::QueuedTask::new(Task::JobSetFinalStatus { job_id }))
        .unwrap();
    assert_eq!(h.job(job_id).status, JobStatus::ReportedWithoutFails);
}
