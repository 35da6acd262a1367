use axum::{extract::State, Json};
use serde_json::json;

use crate::{
    auth::jwt::Claims, embed::service::EmbeddingStats, error::AppJsonResult, ServerState,
};

/// # GET /embeddings/stats
pub async fn stats(
    claims: Claims,
    State(state): State<ServerState>,
) -> AppJsonResult<EmbeddingStats> {
    let stats = state.embedding_service.stats(Some(claims.sub)).await?;
    Ok(Json(stats))
}

/// # POST /embeddings/retry
///
/// Put the user's permanently failed embedding tasks back in the queue.
pub async fn retry(
    claims: Claims,
    State(state): State<ServerState>,
) -> AppJsonResult<serde_json::Value> {
    let reset = state
        .embedding_service
        .retry_permanently_failed(claims.sub)
        .await?;

    Ok(Json(json!({ "reset": reset })))
}
