use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sift::config::{load_settings, settings_from_env};
use sift::db::trigger_repo;
use sift::plugin::builtin;
use sift::{
    BlobStore, Broker, Database, LocalBroker, MaintenanceScheduler, Orchestrator, PluginRegistry,
    QueueRouter, SiftError, WorkerPool,
};

#[derive(Parser, Debug)]
#[command(name = "sift-worker")]
#[command(about = "Runs plugin workers and periodic maintenance for sift")]
struct Cli {
    /// Settings file (JSON). Defaults plus environment overrides when omitted.
    #[arg(short, long, env = "SIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Queue to consume; repeat for several. All configured queues by default.
    #[arg(short, long = "queue")]
    queues: Vec<String>,

    /// Worker threads per queue. Overrides `worker_count` from settings.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Node name prefix; each pool is named `<prefix>_<queue>`.
    #[arg(long, default_value = "worker")]
    hostname_prefix: String,

    /// Do not run the maintenance scheduler on this node.
    #[arg(long, default_value_t = false)]
    no_scheduler: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "SIFT_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge already installed: {}", e);
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn run(cli: Cli) -> Result<(), SiftError> {
    let mut settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => settings_from_env()?,
    };
    if let Some(workers) = cli.workers {
        settings.worker_count = workers;
    }
    let settings = Arc::new(settings);

    let db_path = settings
        .database_path()
        .ok_or_else(|| sift::ConfigError::Validation {
            message: "no database path configured and no home directory".to_string(),
        })?;
    let media_root = settings
        .media_root()
        .ok_or_else(|| sift::ConfigError::Validation {
            message: "no media root configured and no home directory".to_string(),
        })?;

    info!("Opening database at {}", db_path.display());
    let db = Database::open(&db_path)?;
    let disabled = trigger_repo::align_with_downloader(&db, settings.repo_downloader_enabled)?;
    if disabled > 0 {
        info!("Disabled {} update trigger(s): repository downloader is off", disabled);
    }

    let mut registry = PluginRegistry::new();
    builtin::register_all(&mut registry);

    let broker = Arc::new(LocalBroker::new());
    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        Arc::clone(&settings),
        Arc::new(registry),
        Arc::clone(&broker) as Arc<dyn Broker>,
        BlobStore::new(media_root),
    ));

    let router = QueueRouter::from_settings(&settings);
    let queues: Vec<String> = if cli.queues.is_empty() {
        router.queue_names()
    } else {
        cli.queues.iter().map(|q| router.route(q)).collect()
    };

    let mut pools = Vec::with_capacity(queues.len());
    for queue in &queues {
        match WorkerPool::start(
            Arc::clone(&orchestrator),
            &broker,
            queue,
            settings.worker_count,
            &cli.hostname_prefix,
        ) {
            Ok(pool) => pools.push(pool),
            Err(e) => {
                for pool in pools {
                    pool.shutdown();
                    pool.wait();
                }
                return Err(e.into());
            }
        }
    }

    let (trigger_tx, trigger_rx) = broadcast::channel::<()>(4);
    let scheduler = MaintenanceScheduler::new(
        db,
        Arc::clone(&broker) as Arc<dyn Broker>,
        Arc::clone(&settings),
    );
    let scheduler_handle = if cli.no_scheduler {
        None
    } else {
        Some(scheduler.start(trigger_rx)?)
    };

    let (stop_tx, stop_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    info!("sift-worker running on {} queue(s); press Ctrl-C to stop", pools.len());
    let _ = stop_rx.recv();

    info!("Shutting down...");
    scheduler.stop();
    let _ = trigger_tx.send(());
    if let Some(handle) = scheduler_handle {
        if handle.join().is_err() {
            error!("Maintenance scheduler panicked");
        }
    }

    for pool in &pools {
        pool.shutdown();
    }
    for pool in pools {
        pool.wait();
    }

    info!("Stopped");
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    if let Err(e) = run(cli) {
        error!("sift-worker failed: {}", e);
        std::process::exit(1);
    }
}
