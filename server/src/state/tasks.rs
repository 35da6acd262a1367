use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    embed::service::EmailEmbeddingService, error::AppResult, rate_limiters::RateLimiters,
    server_config::cfg,
};

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unknown panic".to_string())
}

/// Drains the embedding task queue one batch per tick until cancelled.
/// A full batch is followed by another one right away.
pub fn run_embedding_loop(
    service: EmailEmbeddingService,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut interval = interval(Duration::from_secs(cfg.embedding.batch_interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        "Starting embedding loop, batch size {} with {} workers...",
        cfg.embedding.batch_size,
        cfg.embedding.max_concurrency
    );

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Embedding loop cancelled");
                    return;
                }
                _ = interval.tick() => {}
            }

            let result = AssertUnwindSafe(service.process_batch())
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(report)) => {
                    if report.claimed > 0 || report.recovered > 0 {
                        tracing::info!("Embedding batch finished: {:?}", report);
                    }
                    if report.claimed as u64 >= cfg.embedding.batch_size {
                        interval.reset_immediately();
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!("Embedding batch failed: {:?}", e);
                }
                Err(panic) => {
                    tracing::error!(
                        "Embedding loop panicked, recovering: {}",
                        panic_message(panic)
                    );
                }
            }
        }
    })
}

/// Queue emails that were stored without going through the embedding queue
pub async fn enqueue_missing_embeddings(service: &EmailEmbeddingService) -> AppResult<u64> {
    let queued = service.enqueue_missing(cfg.embedding.enqueue_limit).await?;
    if queued > 0 {
        tracing::info!("Queued {} emails for embedding", queued);
    }
    Ok(queued)
}

pub fn watch(service: EmailEmbeddingService, rate_limiters: RateLimiters) -> JoinHandle<()> {
    let mut interval = interval(Duration::from_secs(60));
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            let limiter_status = rate_limiters.get_status();
            match service.stats(None).await {
                Ok(stats) => tracing::info!(
                    "Embedding Status Update:\nBucket {limiter_status}\nPending {} Processing {} Failed {} Failed permanently {} Completed {}",
                    stats.pending,
                    stats.processing,
                    stats.failed,
                    stats.failed_permanently,
                    stats.completed,
                ),
                Err(e) => tracing::warn!("Failed to read embedding stats: {:?}", e),
            }
        }
    })
}
