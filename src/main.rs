use std::sync::Arc;
use std::time::Duration;

use cira_crawler::analysis::synthesis::NotConfiguredLlmClient;
use cira_crawler::cache::InMemoryCacheStore;
use cira_crawler::config::Config;
use cira_crawler::jobs::broker::{InMemoryTaskBroker, Queue};
use cira_crawler::jobs::pipeline::Pipeline;
use cira_crawler::jobs::service::JobService;
use cira_crawler::storage::Repositories;
use cira_crawler::{build_app, AppState};
use tracing_subscriber::{fmt, EnvFilter};

/// Idle backoff between empty `tick`s on a queue, so an empty broker doesn't
/// spin a worker task at 100% CPU.
const WORKER_IDLE_BACKOFF: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env().expect("Failed to load configuration from environment"));
    let port = config.port;

    let repos = Repositories::in_memory();
    let cache = Arc::new(InMemoryCacheStore::new());
    let broker = Arc::new(InMemoryTaskBroker::new());
    let llm = Arc::new(NotConfiguredLlmClient);

    let state = AppState {
        config: config.clone(),
        repos: repos.clone(),
        cache: cache.clone(),
        broker: broker.clone(),
        llm: llm.clone(),
    };

    // Cold-start recovery: anything left IN_PROGRESS by a crashed prior run
    // is either failed (if stale) or resumed from its last checkpoint.
    let recovery_jobs = JobService::new(repos.clone(), cache.clone(), broker.clone());
    recovery_jobs.recover_in_progress_jobs(config.stale_job_threshold_secs).await;

    // One worker loop per logical queue, each ticking the pipeline as tasks
    // become available and backing off when the queue runs dry.
    let pipeline = Arc::new(Pipeline::new(repos.clone(), cache.clone(), broker.clone(), config.clone(), llm.clone()));
    for queue in [Queue::Crawl, Queue::Extract, Queue::Analyze] {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            loop {
                pipeline.tick(queue).await;
                tokio::time::sleep(WORKER_IDLE_BACKOFF).await;
            }
        });
    }

    let app = build_app(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Ingestion service starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}
