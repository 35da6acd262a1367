//! Semantic search and per-email embedding endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::{
    auth::jwt::Claims,
    embed::service::EmbeddingOutcome,
    error::{AppError, AppJsonResult},
    model::email::EmailCtrl,
    search::{
        clamp_limit, parse_embedding_types, ranking::RankedEmail, SearchOptions, SearchQuery,
    },
    server_config::cfg,
    ServerState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// The search query string
    pub q: String,
    pub limit: Option<u32>,
    pub min_similarity: Option<f64>,
    /// Comma separated embedding types, e.g. `combined,subject`
    pub types: Option<String>,
    pub category: Option<String>,
    pub since: Option<DateTime<FixedOffset>>,
    pub until: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<RankedEmail>,
    pub query: String,
    pub total: usize,
}

/// # GET /email/search
///
/// Search the user's emails by meaning.
///
/// Query parameters:
/// - `q`: Search query string (required, min 3 characters)
/// - `limit`: Maximum results to return (default and max from config)
/// - `minSimilarity`: Minimum cosine similarity 0-1
/// - `types`: Embedding variants to match against (default: `combined`)
/// - `category`, `since`, `until`: Optional filters
///
/// Results are re-ranked by similarity, recency, importance, urgency and
/// how well the email fits the query intent.
pub async fn search(
    claims: Claims,
    State(state): State<ServerState>,
    Query(params): Query<SearchParams>,
) -> AppJsonResult<SearchResponse> {
    let embedding_types = params
        .types
        .as_deref()
        .map(parse_embedding_types)
        .transpose()?;

    let options = SearchOptions {
        limit: params.limit,
        min_similarity: params.min_similarity,
        embedding_types,
        category: params.category,
        since: params.since,
        until: params.until,
    };
    let query = SearchQuery::new(&params.q, options, &cfg.search)?;

    let results = state.search_service.search(claims.sub, &query).await?;
    let total = results.len();

    Ok(Json(SearchResponse {
        results,
        query: query.text,
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarResponse {
    pub email_id: i32,
    pub results: Vec<RankedEmail>,
    pub total: usize,
}

/// # GET /email/:id/similar
pub async fn similar(
    claims: Claims,
    State(state): State<ServerState>,
    Path(email_id): Path<i32>,
    Query(params): Query<SimilarParams>,
) -> AppJsonResult<SimilarResponse> {
    let limit = clamp_limit(params.limit, &cfg.search);
    let results = state
        .search_service
        .similar_to_email(claims.sub, email_id, limit)
        .await?;
    let total = results.len();

    Ok(Json(SimilarResponse {
        email_id,
        results,
        total,
    }))
}

/// # POST /email/:id/embeddings
///
/// Embed one email right away instead of waiting for the queue.
pub async fn generate_embeddings(
    claims: Claims,
    State(state): State<ServerState>,
    Path(email_id): Path<i32>,
) -> AppJsonResult<EmbeddingOutcome> {
    let email = EmailCtrl::get_for_user(&state.conn, claims.sub, email_id).await?;

    let outcome = state
        .embedding_service
        .generate_for_email(&email)
        .await
        .map_err(|e| AppError::Internal(e.context("Failed to generate embeddings")))?;

    Ok(Json(outcome))
}
