use chrono::Utc;
use entity::sea_orm_active_enums::EmbeddingType;
use sea_orm::DatabaseConnection;

use crate::{
    embed::EmbeddingClient,
    error::{AppError, AppResult},
    model::{
        email::EmailCtrl,
        email_embedding::{CandidateFilter, EmailEmbeddingCtrl},
    },
    search::{
        intent::SearchIntent,
        ranking::{RankedEmail, Ranker},
        SearchQuery,
    },
    server_config::cfg,
};

/// Extra candidates fetched per requested result, so grouping and
/// re-ranking still have enough to fill the page
const CANDIDATE_FACTOR: u64 = 3;

#[derive(Clone)]
pub struct SearchService {
    conn: DatabaseConnection,
    client: EmbeddingClient,
    ranker: Ranker,
}

impl SearchService {
    pub fn new(conn: DatabaseConnection, client: EmbeddingClient) -> Self {
        Self {
            conn,
            client,
            ranker: Ranker {
                weights: cfg.search.weights,
                half_life_days: cfg.search.recency_half_life_days,
            },
        }
    }

    pub async fn search(&self, user_id: i32, query: &SearchQuery) -> AppResult<Vec<RankedEmail>> {
        let query_embedding = self
            .client
            .embed(&query.text)
            .await
            .map_err(|e| AppError::Internal(e.context("Failed to embed search query")))?;

        let filter = CandidateFilter {
            embedding_types: query.embedding_types.clone(),
            min_similarity: query.min_similarity,
            category: query.category.clone(),
            since: query.since,
            until: query.until,
            exclude_email_id: None,
        };

        let candidates = EmailEmbeddingCtrl::search_candidates(
            &self.conn,
            user_id,
            &query_embedding,
            &filter,
            query.limit as u64 * CANDIDATE_FACTOR,
        )
        .await?;

        let results = self.ranker.rank(
            &candidates,
            SearchIntent::classify(&query.text),
            Utc::now().fixed_offset(),
            query.limit as usize,
        );

        tracing::debug!(
            "Search for user {} returned {} of {} candidates",
            user_id,
            results.len(),
            candidates.len()
        );

        Ok(results)
    }

    /// Emails closest to a stored email, excluding the email itself
    pub async fn similar_to_email(
        &self,
        user_id: i32,
        email_id: i32,
        limit: u32,
    ) -> AppResult<Vec<RankedEmail>> {
        let email = EmailCtrl::get_for_user(&self.conn, user_id, email_id).await?;

        let vector =
            EmailEmbeddingCtrl::vector_for_email(&self.conn, email.id, EmbeddingType::Combined)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(format!("Email {} has no embeddings yet", email.id))
                })?;

        let filter = CandidateFilter {
            embedding_types: vec![EmbeddingType::Combined],
            min_similarity: cfg.search.default_min_similarity,
            exclude_email_id: Some(email.id),
            ..Default::default()
        };

        let candidates = EmailEmbeddingCtrl::search_candidates(
            &self.conn,
            user_id,
            &vector,
            &filter,
            limit as u64 * CANDIDATE_FACTOR,
        )
        .await?;

        Ok(self.ranker.rank(
            &candidates,
            SearchIntent::classify(&email.subject),
            Utc::now().fixed_offset(),
            limit as usize,
        ))
    }
}

#[cfg(all(test, feature = "integration"))]
mod tests {
    use super::*;
    use crate::{
        model::email_embedding::EmbeddingInsert,
        rate_limiters::RateLimiters,
        testing::common::{axis_vector, insert_email, setup, NewEmail},
        util::sha256_hex,
        HttpClient,
    };

    fn offline_service(conn: &DatabaseConnection) -> SearchService {
        let client = EmbeddingClient::with_base_url(
            HttpClient::new(),
            RateLimiters::from_config(),
            "http://127.0.0.1:9",
        )
        .unwrap();
        SearchService::new(conn.clone(), client)
    }

    async fn store_combined(conn: &DatabaseConnection, email: &entity::email::Model, v: Vec<f32>) {
        EmailEmbeddingCtrl::insert(
            conn,
            EmbeddingInsert {
                email_id: email.id,
                user_id: email.user_id,
                embedding_type: EmbeddingType::Combined,
                content_hash: sha256_hex(&email.subject),
                model: "test".to_string(),
                embedding: v,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_similar_excludes_the_email_itself() {
        let (conn, user_id) = setup().await;
        let target = insert_email(
            &conn,
            user_id,
            NewEmail {
                subject: "Holiday photos".to_string(),
                category: Some("billing".to_string()),
                ..Default::default()
            },
        )
        .await;
        let near = insert_email(
            &conn,
            user_id,
            NewEmail {
                subject: "Invoice for March".to_string(),
                ..Default::default()
            },
        )
        .await;
        let far = insert_email(&conn, user_id, NewEmail::default()).await;

        store_combined(&conn, &target, axis_vector(0)).await;
        store_combined(&conn, &near, axis_vector(0)).await;
        store_combined(&conn, &far, axis_vector(1)).await;

        let results = offline_service(&conn)
            .similar_to_email(user_id, target.id, 10)
            .await
            .unwrap();

        let ids: Vec<i32> = results.iter().map(|r| r.email_id).collect();
        assert_eq!(ids, vec![near.id]);
        // The query intent comes from the subject alone, which has no keywords
        assert_eq!(results[0].intent, SearchIntent::Financial);
        assert!((results[0].breakdown.intent_alignment - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_similar_needs_stored_vector() {
        let (conn, user_id) = setup().await;
        let email = insert_email(&conn, user_id, NewEmail::default()).await;

        let err = offline_service(&conn)
            .similar_to_email(user_id, email.id, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = offline_service(&conn)
            .similar_to_email(user_id + 1_000_000, email.id, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
