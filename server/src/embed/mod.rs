pub mod chunker;
pub mod content;
pub mod service;
pub mod task_state;

use anyhow::{anyhow, bail, Context};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{rate_limiters::RateLimiters, server_config::cfg, HttpClient};

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Client for the embedding model served by Ollama
#[derive(Clone)]
pub struct EmbeddingClient {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    endpoint: Url,
    model: String,
    dimensions: usize,
}

impl EmbeddingClient {
    pub fn new(http_client: HttpClient, rate_limiters: RateLimiters) -> anyhow::Result<Self> {
        Self::with_base_url(http_client, rate_limiters, &cfg.ollama.base_url)
    }

    pub fn with_base_url(
        http_client: HttpClient,
        rate_limiters: RateLimiters,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("api/embeddings"))
            .with_context(|| format!("Invalid embedding server url: {}", base_url))?;

        Ok(Self {
            http_client,
            rate_limiters,
            endpoint,
            model: cfg.ollama.embedding_model.clone(),
            dimensions: cfg.embedding.dimensions,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_backing_off(&self) -> bool {
        self.rate_limiters.is_backing_off()
    }

    pub async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.rate_limiters.acquire_embed().await;

        let resp = self
            .http_client
            .post(self.endpoint.clone())
            .json(&json!({
                "model": &self.model,
                "prompt": text,
            }))
            .send()
            .await
            .context("Embedding request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            self.rate_limiters.trigger_backoff();
            bail!("Embedding server is overloaded ({})", status);
        }

        let body = resp
            .error_for_status()
            .context("Embedding server returned an error")?
            .json::<OllamaEmbeddingResponse>()
            .await
            .context("Failed to parse embedding response")?;

        validate_embedding(body.embedding, self.dimensions)
    }
}

/// Reject empty vectors and vectors that do not fit the `vector(N)` column
pub fn validate_embedding(embedding: Vec<f32>, dimensions: usize) -> anyhow::Result<Vec<f32>> {
    if embedding.is_empty() {
        return Err(anyhow!("Embedding model returned an empty vector"));
    }
    if embedding.len() != dimensions {
        bail!(
            "Embedding has {} dimensions, expected {}",
            embedding.len(),
            dimensions
        );
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        bail!("Embedding contains non-finite values");
    }
    Ok(embedding)
}

/// Cosine similarity in [-1, 1]; 0.0 for mismatched or zero-norm vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
