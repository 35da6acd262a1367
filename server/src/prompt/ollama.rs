//! Chat completions against the Ollama `/api/chat` endpoint

use anyhow::{anyhow, Context};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::{
    error::{AppError, AppResult},
    rate_limiters::RateLimiters,
    server_config::cfg,
    HttpClient,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub model: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub prompt_eval_count: i64,
    #[serde(default)]
    pub eval_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

#[derive(Debug)]
pub struct ChatResponse {
    pub content: String,
    pub token_usage: i64,
}

#[derive(Clone)]
pub struct OllamaChat {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    endpoint: Url,
    model: String,
    temperature: f64,
}

impl OllamaChat {
    pub fn new(http_client: HttpClient, rate_limiters: RateLimiters) -> anyhow::Result<Self> {
        Self::with_base_url(http_client, rate_limiters, &cfg.ollama.base_url)
    }

    pub fn with_base_url(
        http_client: HttpClient,
        rate_limiters: RateLimiters,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("api/chat"))
            .with_context(|| format!("Invalid chat server url: {}", base_url))?;

        Ok(Self {
            http_client,
            rate_limiters,
            endpoint,
            model: cfg.ollama.chat_model.clone(),
            temperature: cfg.ollama.temperature,
        })
    }

    /// One non-streaming chat turn constrained to JSON output
    pub async fn chat_json(&self, system: &str, user: &str) -> AppResult<ChatResponse> {
        self.rate_limiters.acquire_chat().await;

        let resp = self
            .http_client
            .post(self.endpoint.clone())
            .json(&json!({
                "model": &self.model,
                "stream": false,
                "format": "json",
                "options": { "temperature": self.temperature },
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user }
                ]
            }))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            self.rate_limiters.trigger_backoff();
            return Err(AppError::TooManyRequests);
        }

        let body = resp.json::<serde_json::Value>().await?;
        let parsed = serde_json::from_value::<ChatApiResponseOrError>(body.clone())
            .context(format!("Could not parse chat response: {}", body))?;

        match parsed {
            ChatApiResponseOrError::Error(error) => {
                Err(anyhow!("Chat API error ({}): {}", status, error.error).into())
            }
            ChatApiResponseOrError::Response(parsed) => Ok(ChatResponse {
                token_usage: parsed.prompt_eval_count + parsed.eval_count,
                content: parsed.message.content,
            }),
        }
    }
}
