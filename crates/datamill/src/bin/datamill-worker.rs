use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};

use datamill::catalog::Catalog;
use datamill::db::Database;
use datamill::error::{ConfigError, StorageError};
use datamill::job::JobStore;
use datamill::pipeline::{Pipeline, PipelineConfig, RunOutcome};
use datamill::worker::{recover_interrupted, sweep_pending, WorkerPool};
use datamill::{load_config, logging, JobProgressBroadcaster};

const TICK: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "datamill-worker",
    version,
    about = "Runs queued processing jobs until interrupted"
)]
struct Cli {
    /// Path to the config file (JSON or YAML)
    #[arg(short, long, env = "DATAMILL_CONFIG")]
    config: PathBuf,

    /// Number of worker threads (overrides the config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> datamill::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    logging::init(&level, config.logging.json);

    let database_path = config
        .database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory was found".to_string(),
        })?;
    let db = Database::open(&database_path)?;

    let pipeline_config = PipelineConfig::from_config(&config);
    std::fs::create_dir_all(&pipeline_config.output_directory).map_err(|e| {
        StorageError::CreateDirectory {
            path: pipeline_config.output_directory.clone(),
            source: e,
        }
    })?;

    let store = JobStore::new(db.clone());
    recover_interrupted(&store)?;
    let pipeline = Arc::new(Pipeline::from_config(
        store.clone(),
        Catalog::new(db),
        &pipeline_config,
    ));
    let broadcaster = JobProgressBroadcaster::default();
    let pool = WorkerPool::with_progress_sender(
        pipeline,
        config.worker_count,
        config.queue_capacity,
        Some(broadcaster.sender()),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    info!(
        "datamill-worker running with {} workers (database {})",
        pool.worker_count(),
        database_path.display()
    );

    let sweep_interval = Duration::from_millis(config.sweep_interval_ms);
    let mut last_sweep: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if last_sweep.map_or(true, |at| at.elapsed() >= sweep_interval) {
            if let Err(e) = sweep_pending(&store, &pool) {
                error!("Sweep failed: {}", e);
            }
            last_sweep = Some(Instant::now());
        }

        while let Some(result) = pool.try_recv_result() {
            match result.outcome {
                RunOutcome::Completed {
                    output_record_count,
                    pii_detected_count,
                    ..
                } => info!(
                    "Job {} completed ({} records, {} PII findings)",
                    result.job_id, output_record_count, pii_detected_count
                ),
                RunOutcome::Failed { error } => {
                    warn!("Job {} failed: {}", result.job_id, error)
                }
                RunOutcome::Cancelled => info!("Job {} cancelled", result.job_id),
                RunOutcome::Skipped => {}
            }
        }

        std::thread::sleep(TICK);
    }

    info!("Interrupted, stopping workers");
    pool.shutdown();
    pool.wait();
    Ok(())
}
