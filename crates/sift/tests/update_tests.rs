//! Broadcast dataset updates and worker boot sync.

mod common;

use std::time::{Duration, Instant};

use common::{TestHarness, COUNTING_PATH};
use sift::broker::{ControlCommand, Task};
use sift::config::Settings;
use sift::db::trigger_repo;
use sift::maintenance::{PeriodicUpdateTrigger, TriggerTask};
use sift::plugin::{PluginConfig, PluginKind};

fn add_counting(h: &TestHarness, name: &str, queue: &str) {
    let mut config = PluginConfig::new(name, PluginKind::Analyzer, COUNTING_PATH);
    config.queue = queue.to_string();
    h.add_config(&config);
    trigger_repo::insert(
        &h.db,
        &PeriodicUpdateTrigger::new(
            &format!("{}_update", name),
            TriggerTask::Update,
            name,
            queue,
            Duration::from_secs(3600),
        ),
    )
    .unwrap();
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn test_update_reaches_every_subscriber() {
    let h = TestHarness::new();
    add_counting(&h, "Dataset", "default");

    let mut subscribers: Vec<_> = (0..3).map(|_| h.broker.subscribe("default").unwrap()).collect();
    h.orchestrator
        .execute(sift::QueuedTask::new(Task::Update {
            config_pk: "Dataset".to_string(),
        }))
        .unwrap();

    for rx in &mut subscribers {
        let command = rx.try_recv().unwrap();
        assert_eq!(
            command,
            ControlCommand::UpdatePlugin {
                plugin_path: COUNTING_PATH.to_string()
            }
        );
        h.orchestrator.handle_control(command);
    }
    assert_eq!(h.counting.updates(), 3);
}

#[test]
fn test_update_with_no_workers_is_not_an_error() {
    let h = TestHarness::new();
    add_counting(&h, "Dataset", "default");
    assert!(h.orchestrator.update("Dataset").unwrap());
    assert_eq!(h.counting.updates(), 0);
}

#[test]
fn test_boot_sync_on_default_queue_worker() {
    let h = TestHarness::with_settings(Settings {
        queues: vec!["default".to_string(), "long".to_string()],
        ..Settings::default()
    });
    add_counting(&h, "Dataset", "default");

    let long_pool = h.start_pool("long", 1, "node");
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(h.counting.updates(), 0);

    let pool = h.start_pool("default", 1, "node");
    assert!(wait_for(|| h.counting.updates() >= 1));

    pool.shutdown();
    long_pool.shutdown();
    pool.wait();
    long_pool.wait();
}

#[test]
fn test_boot_sync_with_prefixed_queues() {
    let h = TestHarness::with_settings(Settings {
        queue_prefix: Some("prod".to_string()),
        ..Settings::default()
    });
    add_counting(&h, "Dataset", "default");

    assert_eq!(h.orchestrator.on_worker_ready("node_prod.default"), vec!["Dataset"]);
    assert!(h.orchestrator.on_worker_ready("node_default").is_empty());
}

#[test]
fn test_running_pool_applies_broadcast_updates() {
    let h = TestHarness::with_settings(Settings {
        repo_downloader_enabled: false,
        ..Settings::default()
    });
    add_counting(&h, "Dataset", "default");

    let pool = h.start_pool("default", 1, "node");
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(h.counting.updates(), 0);

    assert!(h.orchestrator.update("Dataset").unwrap());
    assert!(wait_for(|| h.counting.updates() == 1));

    pool.shutdown();
    pool.wait();
}
