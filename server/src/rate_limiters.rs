use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::server_config::{cfg, RequestLimits};

const BACKOFF_SECS: u64 = 60;

/// Request budgets for the model server: one bucket for embedding calls,
/// one for chat completions, plus a shared backoff flag that is raised when
/// the server reports overload.
#[derive(Clone)]
pub struct RateLimiters {
    embed: Arc<RateLimiter>,
    chat: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

fn build_limiter(limits: &RequestLimits) -> RateLimiter {
    RateLimiter::builder()
        .initial(1)
        .interval(Duration::from_millis(limits.refill_interval_ms as u64))
        .max(limits.rate_limit_per_sec)
        .refill(limits.refill_amount)
        .build()
}

impl RateLimiters {
    pub fn new(embed_limits: &RequestLimits, chat_limits: &RequestLimits) -> Self {
        Self {
            embed: Arc::new(build_limiter(embed_limits)),
            chat: Arc::new(build_limiter(chat_limits)),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: Duration::from_secs(BACKOFF_SECS),
        }
    }

    pub fn from_config() -> Self {
        Self::new(&cfg.api.embed_limits, &cfg.api.chat_limits)
    }

    async fn wait_for_backoff(&self) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
    }

    pub async fn acquire_embed(&self) {
        self.wait_for_backoff().await;
        self.embed.acquire_one().await;
    }

    pub async fn acquire_chat(&self) {
        self.wait_for_backoff().await;
        self.chat.acquire_one().await;
    }

    pub fn is_backing_off(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn trigger_backoff(&self) {
        // Already backing off, the pending reset covers this one too
        if self.backoff.swap(true, Relaxed) {
            return;
        }
        tracing::info!("Triggering backoff...");
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn get_status(&self) -> String {
        let embed_bucket = format!("{}/{}", self.embed.balance(), self.embed.max());
        let chat_bucket = format!("{}/{}", self.chat.balance(), self.chat.max());
        if self.is_backing_off() {
            format!("embed: {} chat: {} (BACKOFF)", embed_bucket, chat_bucket)
        } else {
            format!("embed: {} chat: {}", embed_bucket, chat_bucket)
        }
    }
}
