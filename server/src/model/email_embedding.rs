//! Stored email vectors and pgvector similarity queries

use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use sea_orm::{ConnectionTrait, DatabaseConnection, FromQueryResult, Statement, Value};

use crate::{
    db_core::prelude::*,
    error::AppResult,
    util::{format_vector, parse_vector},
};

pub struct EmailEmbeddingCtrl;

/// Entry for inserting one embedding.
/// The vector goes through a `::vector` cast because
/// sea_orm has no pgvector column type.
pub struct EmbeddingInsert {
    pub email_id: i32,
    pub user_id: i32,
    pub embedding_type: EmbeddingType,
    pub content_hash: String,
    pub model: String,
    pub embedding: Vec<f32>,
}

/// One matching vector joined with the fields ranking needs
#[derive(Debug, Clone, FromQueryResult)]
pub struct CandidateRow {
    pub email_id: i32,
    pub embedding_type: String,
    pub similarity: f64,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<FixedOffset>,
    pub importance_score: f64,
    pub urgency_score: f64,
    pub category: Option<String>,
    pub is_important: bool,
    pub is_flagged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub embedding_types: Vec<EmbeddingType>,
    pub min_similarity: f64,
    pub category: Option<String>,
    pub since: Option<DateTime<FixedOffset>>,
    pub until: Option<DateTime<FixedOffset>>,
    pub exclude_email_id: Option<i32>,
}

#[derive(Debug, FromQueryResult)]
struct VectorRow {
    email_id: i32,
    embedding: String,
}

impl EmailEmbeddingCtrl {
    pub async fn exists(
        conn: &DatabaseConnection,
        email_id: i32,
        embedding_type: EmbeddingType,
        content_hash: &str,
    ) -> AppResult<bool> {
        let found = EmailEmbedding::find()
            .filter(email_embedding::Column::EmailId.eq(email_id))
            .filter(email_embedding::Column::EmbeddingType.eq(embedding_type))
            .filter(email_embedding::Column::ContentHash.eq(content_hash))
            .one(conn)
            .await?;
        Ok(found.is_some())
    }

    /// Insert a vector unless the same (email, type, content hash) is stored.
    /// Returns whether a row was written.
    pub async fn insert(conn: &DatabaseConnection, entry: EmbeddingInsert) -> AppResult<bool> {
        let embedding_str = format_vector(&entry.embedding);

        let insert_stmt = Query::insert()
            .into_table(email_embedding::Entity)
            .columns([
                Alias::new("email_id"),
                Alias::new("user_id"),
                Alias::new("embedding_type"),
                Alias::new("content_hash"),
                Alias::new("model"),
                Alias::new("embedding"),
            ])
            .values_panic([
                entry.email_id.into(),
                entry.user_id.into(),
                entry.embedding_type.as_str().into(),
                entry.content_hash.into(),
                entry.model.into(),
                Expr::cust(format!("'{}'::vector", embedding_str)),
            ])
            .on_conflict(
                OnConflict::columns([
                    email_embedding::Column::EmailId,
                    email_embedding::Column::EmbeddingType,
                    email_embedding::Column::ContentHash,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_owned();

        let builder = conn.get_database_backend();
        let result = conn.execute(builder.build(&insert_stmt)).await?;

        Ok(result.rows_affected() > 0)
    }

    /// Vector search scoped to one user.
    ///
    /// Returns the best matching variant per email, most similar first.
    pub async fn search_candidates(
        conn: &DatabaseConnection,
        user_id: i32,
        query_embedding: &[f32],
        filter: &CandidateFilter,
        limit: u64,
    ) -> AppResult<Vec<CandidateRow>> {
        let types = if filter.embedding_types.is_empty() {
            vec![EmbeddingType::Combined]
        } else {
            filter.embedding_types.clone()
        };
        let type_list = types
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        // $1 user, $2 query vector, $3 min similarity
        let mut values: Vec<Value> = vec![
            user_id.into(),
            format_vector(query_embedding).into(),
            filter.min_similarity.into(),
        ];
        let mut clauses = Vec::new();

        if let Some(category) = &filter.category {
            values.push(category.clone().into());
            clauses.push(format!("AND m.category = ${}", values.len()));
        }
        if let Some(since) = filter.since {
            values.push(since.into());
            clauses.push(format!("AND m.received_at >= ${}", values.len()));
        }
        if let Some(until) = filter.until {
            values.push(until.into());
            clauses.push(format!("AND m.received_at < ${}", values.len()));
        }
        if let Some(exclude) = filter.exclude_email_id {
            values.push(exclude.into());
            clauses.push(format!("AND e.email_id <> ${}", values.len()));
        }
        values.push((limit as i64).into());
        let limit_param = values.len();

        // 1 - (embedding <=> query) converts distance to similarity
        let sql = format!(
            r#"
            SELECT
                e.email_id,
                e.embedding_type,
                1 - (e.embedding <=> $2::vector) AS similarity,
                m.subject,
                m.sender,
                m.received_at,
                m.importance_score,
                m.urgency_score,
                m.category,
                m.is_important,
                m.is_flagged
            FROM email_embedding e
            JOIN email m ON m.id = e.email_id
            WHERE e.user_id = $1
                AND m.user_id = $1
                AND e.embedding_type IN ({type_list})
                AND 1 - (e.embedding <=> $2::vector) >= $3
                {clauses}
            ORDER BY e.embedding <=> $2::vector
            LIMIT ${limit_param}
            "#,
            type_list = type_list,
            clauses = clauses.join("\n                "),
            limit_param = limit_param,
        );

        let rows = conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                values,
            ))
            .await?;

        let mut best: HashMap<i32, CandidateRow> = HashMap::new();
        for row in rows {
            let candidate = CandidateRow::from_query_result(&row, "")?;
            match best.get(&candidate.email_id) {
                Some(existing) if existing.similarity >= candidate.similarity => {}
                _ => {
                    best.insert(candidate.email_id, candidate);
                }
            }
        }

        let mut candidates: Vec<CandidateRow> = best.into_values().collect();
        candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        Ok(candidates)
    }

    /// Latest stored vector of the given type for each email
    pub async fn vectors_for_emails(
        conn: &DatabaseConnection,
        email_ids: &[i32],
        embedding_type: EmbeddingType,
    ) -> AppResult<HashMap<i32, Vec<f32>>> {
        if email_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let id_list = email_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            r#"
            SELECT DISTINCT ON (email_id)
                email_id,
                embedding::text AS embedding
            FROM email_embedding
            WHERE email_id IN ({id_list})
                AND embedding_type = $1
            ORDER BY email_id, created_at DESC, id DESC
            "#,
            id_list = id_list,
        );

        let rows = conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [embedding_type.as_str().into()],
            ))
            .await?;

        let mut vectors = HashMap::with_capacity(rows.len());
        for row in rows {
            let row = VectorRow::from_query_result(&row, "")?;
            let vector = parse_vector(&row.embedding)
                .with_context(|| format!("Stored vector for email {} is corrupt", row.email_id))?;
            vectors.insert(row.email_id, vector);
        }

        Ok(vectors)
    }

    pub async fn vector_for_email(
        conn: &DatabaseConnection,
        email_id: i32,
        embedding_type: EmbeddingType,
    ) -> AppResult<Option<Vec<f32>>> {
        let mut vectors = Self::vectors_for_emails(conn, &[email_id], embedding_type).await?;
        Ok(vectors.remove(&email_id))
    }

    pub async fn count_for_user(conn: &DatabaseConnection, user_id: Option<i32>) -> AppResult<u64> {
        let mut query = EmailEmbedding::find();
        if let Some(user_id) = user_id {
            query = query.filter(email_embedding::Column::UserId.eq(user_id));
        }
        Ok(query.count(conn).await?)
    }
}
