use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, Utc};
use entity::sea_orm_active_enums::EmbeddingType;
use serde::{Deserialize, Serialize};

use crate::{
    auth::jwt::Claims,
    error::AppJsonResult,
    model::{email::EmailCtrl, email_embedding::EmailEmbeddingCtrl},
    server_config::cfg,
    threads::{detector::ThreadDetector, EmailThread},
    ServerState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadParams {
    pub days: Option<i64>,
    /// Address of the mailbox owner, defaults to the token's email
    pub user_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    pub threads: Vec<EmailThread>,
    pub days: i64,
    pub total: usize,
}

fn clamp_days(days: Option<i64>) -> i64 {
    days.unwrap_or(cfg.settings.default_thread_days)
        .clamp(1, cfg.settings.max_thread_days.max(1))
}

/// # GET /threads
///
/// Detect conversation threads among the emails of the last `days` days.
pub async fn detect(
    claims: Claims,
    State(state): State<ServerState>,
    Query(params): Query<ThreadParams>,
) -> AppJsonResult<ThreadResponse> {
    let days = clamp_days(params.days);
    let now = Utc::now().fixed_offset();

    let emails = EmailCtrl::list_since(&state.conn, claims.sub, now - Duration::days(days)).await?;
    let ids: Vec<i32> = emails.iter().map(|e| e.id).collect();
    let embeddings =
        EmailEmbeddingCtrl::vectors_for_emails(&state.conn, &ids, EmbeddingType::Combined).await?;

    let user_address = params.user_address.unwrap_or(claims.email);
    let detector = ThreadDetector::new(cfg.threads, Some(&user_address));
    let threads = detector.detect(&emails, Some(&embeddings), now);
    let total = threads.len();

    tracing::debug!(
        "Detected {} threads in {} emails for user {}",
        total,
        emails.len(),
        claims.sub
    );

    Ok(Json(ThreadResponse {
        threads,
        days,
        total,
    }))
}
