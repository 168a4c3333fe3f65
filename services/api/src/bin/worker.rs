//! services/api/src/bin/worker.rs
//!
//! Consumes reading jobs from the PostgreSQL queue and generates readings
//! until interrupted. In-flight jobs finish before the process exits.

use api_lib::{
    adapters::{DbAdapter, OpenAiReadingAdapter, PgJobQueue},
    config::Config,
    error::ApiError,
};
use futures::future::join_all;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tuvi_core::readings::ReadingRequests;
use tuvi_core::worker::ReadingWorker;

/// Cancels `shutdown` once `signal` fires. If the listener cannot be
/// installed the workers keep running and only a kill stops them.
async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown signal received; finishing in-flight jobs");
            shutdown.cancel();
        }
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal; workers keep running"),
    }
}

/// Periodically requeues readings stranded in `QUEUED` without a job.
async fn sweep_orphans(requests: ReadingRequests, every: Duration, shutdown: CancellationToken) {
    loop {
        match requests.requeue_orphans(every).await {
            Ok(0) => {}
            Ok(requeued) => warn!(requeued, "Recovered readings that had no queue job"),
            Err(e) => error!(error = %e, "Orphan sweep failed"),
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = PgPoolOptions::new()
        .max_connections((config.worker_concurrency as u32).saturating_add(2))
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    db_adapter.run_migrations().await?;

    let queue = Arc::new(PgJobQueue::new(
        db_pool.clone(),
        config.retry_policy(),
        config.queue_visibility_timeout,
    ));
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; readings will fail until it is configured");
    }
    let provider = Arc::new(OpenAiReadingAdapter::from_api_key(
        config.openai_api_key.as_deref(),
    ));

    let requests = ReadingRequests::new(db_adapter.clone(), queue.clone(), config.ai_model.clone());
    let worker = ReadingWorker::new(db_adapter, queue, provider, config.retry_policy())
        .with_poll_interval(config.worker_poll_interval);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    info!(
        concurrency = config.worker_concurrency,
        model = %config.ai_model,
        "Starting reading workers"
    );
    let loops = (0..config.worker_concurrency).map(|_| {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });
    tokio::join!(
        join_all(loops),
        sweep_orphans(requests, config.queue_visibility_timeout, shutdown.clone()),
    );

    db_pool.close().await;
    info!("Worker shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuvi_core::domain::{BirthInput, NewReading};
    use tuvi_core::intake::SubmissionIntake;
    use tuvi_core::memory::MemoryStore;
    use tuvi_core::ports::DatabaseService;
    use tuvi_core::queue::{MemoryQueue, RetryPolicy};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_signal_cancels_shutdown() {
        let shutdown = CancellationToken::new();
        cancel_on_signal(async { Ok(()) }, shutdown.clone()).await;
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_signal_listener_keeps_workers_running() {
        let shutdown = CancellationToken::new();
        let failed = async { Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal handler")) };
        cancel_on_signal(failed, shutdown.clone()).await;
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_sweep_requeues_stranded_reading_before_stopping() {
        let db = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new(RetryPolicy::default()));
        let submission = SubmissionIntake::new(db.clone())
            .submit(BirthInput::new("1990-01-01"))
            .await
            .unwrap();
        db.create_reading(NewReading {
            submission_id: submission.id,
            prompt_version_id: Uuid::new_v4(),
            model_name: "gpt-5-mini".to_string(),
        })
        .await
        .unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let requests = ReadingRequests::new(db, queue.clone(), "gpt-5-mini".to_string());
        sweep_orphans(requests, Duration::ZERO, shutdown).await;

        assert_eq!(queue.pending().await, 1);
    }
}
