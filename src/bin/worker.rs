use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use credential_pipeline::{
    app_state::AppState,
    clock::SystemClock,
    config::AppConfig,
    db,
    jobs::JobRunner,
    services::{
        compositor::Compositor,
        queue::{JobQueue, Lane, RedisQueue},
        renderer::ArtifactRenderer,
        storage::{LocalStorage, S3Storage, Storage},
    },
    store::{PgCredentialStore, PgPrintBatchStore, PgTemplateStore},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting credential pipeline worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let storage: Arc<dyn Storage> = match config.s3() {
        Some(s3) => {
            tracing::info!(bucket = s3.bucket, "Using S3 storage");
            Arc::new(
                S3Storage::new(s3.bucket, s3.endpoint, s3.access_key, s3.secret_key)
                    .expect("Failed to initialize S3 storage"),
            )
        }
        None => {
            tracing::info!(root = %config.storage_root, "Using local storage");
            Arc::new(LocalStorage::new(&config.storage_root))
        }
    };

    let clock = Arc::new(SystemClock);
    let queue = Arc::new(
        RedisQueue::new(&config.redis_url, clock.clone()).expect("Failed to initialize job queue"),
    );
    let compositor = Arc::new(Compositor::new(&config.font_dir));
    let renderer = Arc::new(ArtifactRenderer::new(storage.clone(), compositor));

    let state = AppState {
        credentials: Arc::new(PgCredentialStore::new(pool.clone())),
        print_batches: Arc::new(PgPrintBatchStore::new(pool.clone())),
        templates: Arc::new(PgTemplateStore::new(pool)),
        storage,
        queue: queue.clone(),
        renderer,
        clock,
        pipeline: config.pipeline(),
    };

    let metrics_addr: std::net::SocketAddr = config
        .metrics_addr
        .parse()
        .expect("Invalid metrics address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics recorder");
    describe_metrics();

    tracing::info!("Worker ready, starting job processing loop");
    let runner = JobRunner::new(state);

    // Shutdown must never cancel a dispatched job: a dropped future leaves
    // its envelope stranded in the lane's processing list. The signal only
    // flips a flag; the in-flight poll always runs to acknowledgement.
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        let wake = wake.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing in-flight work");
                shutdown.store(true, Ordering::SeqCst);
                wake.notify_waiters();
            }
        });
    }

    loop {
        let processed = poll_lanes(&runner, queue.as_ref(), &shutdown).await;
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("Worker stopped");
            break;
        }
        if !processed {
            tokio::select! {
                _ = wake.notified() => {}
                _ = sleep(Duration::from_millis(config.poll_interval_ms)) => {}
            }
        }
    }
}

/// One pass over every lane, stopping between lanes once shutdown is
/// requested. Returns whether any lane yielded a job.
async fn poll_lanes(runner: &JobRunner, queue: &dyn JobQueue, shutdown: &AtomicBool) -> bool {
    let mut processed = false;
    for lane in Lane::ALL {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Ok(depth) = queue.depth(lane).await {
            metrics::gauge!("queue_depth", "lane" => lane.to_string()).set(depth as f64);
        }
        match runner.poll_once(lane).await {
            Ok(ran) => processed |= ran,
            Err(e) => {
                tracing::error!(%lane, error = %e, "queue error while polling");
            }
        }
    }
    processed
}

fn describe_metrics() {
    metrics::describe_counter!(
        "jobs_completed_total",
        "Jobs that finished successfully, by kind"
    );
    metrics::describe_counter!(
        "jobs_retried_total",
        "Job attempts re-enqueued for retry, by kind"
    );
    metrics::describe_counter!(
        "jobs_dead_lettered_total",
        "Jobs parked after terminal failure, by kind"
    );
    metrics::describe_counter!(
        "print_batch_pages_total",
        "Credential pages composited into batch PDFs"
    );
    metrics::describe_counter!(
        "credentials_expired_total",
        "Credentials deactivated by expiration sweeps"
    );
    metrics::describe_histogram!(
        "job_duration_seconds",
        "Wall-clock duration of one job attempt, by kind"
    );
    metrics::describe_gauge!("queue_depth", "Immediately runnable jobs per lane");
}
