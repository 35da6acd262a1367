use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub default_thread_days: i64,
    pub max_thread_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub batch_size: u64,
    pub batch_interval_secs: u64,
    pub max_concurrency: usize,
    pub max_attempts: i32,
    pub backoff_base_secs: i64,
    pub backoff_max_secs: i64,
    pub stale_after_secs: i64,
    pub enqueue_interval_secs: u64,
    pub enqueue_limit: u64,
}

/// Linear weights of the search ranking formula
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RankingWeights {
    pub similarity: f64,
    pub recency: f64,
    pub importance: f64,
    pub urgency: f64,
    pub intent: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 0.60,
            recency: 0.15,
            importance: 0.10,
            urgency: 0.05,
            intent: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub default_limit: u32,
    pub max_limit: u32,
    pub default_min_similarity: f64,
    pub recency_half_life_days: f64,
    pub weights: RankingWeights,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThreadConfig {
    pub min_participant_overlap: f64,
    pub time_window_days: i64,
    pub semantic_threshold: f32,
    pub stale_after_days: i64,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            min_participant_overlap: 0.3,
            time_window_days: 14,
            semantic_threshold: 0.85,
            stale_after_days: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WorkflowConfig {
    pub group_threshold: f32,
    pub max_group_size: usize,
    pub max_emails: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            group_threshold: 0.75,
            max_group_size: 10,
            max_emails: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub embed_limits: RequestLimits,
    pub chat_limits: RequestLimits,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub settings: Settings,
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub threads: ThreadConfig,
    pub workflow: WorkflowConfig,
    pub api: ApiConfig,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\n{:?}\n\nOllama: {:?}\n\nEmbedding: {:?}\n\nSearch: {:?}\n\nThreads: {:?}\n\nWorkflow: {:?}\n\nAPI: {:?}",
            self.settings,
            self.ollama,
            self.embedding,
            self.search,
            self.threads,
            self.workflow,
            self.api,
        )
    }
}

fn config_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir).parent().unwrap().display().to_string();
        format!("{}/config", dir)
    })
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = config_root();
        let path = format!("{root}/config.toml");
        let mut server_config: ServerConfig = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        if let Ok(url) = env::var("OLLAMA_URL") {
            server_config.ollama.base_url = url;
        }

        server_config
    };
}
