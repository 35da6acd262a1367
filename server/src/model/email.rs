use chrono::Utc;
use sea_orm::PaginatorTrait;

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
};

pub struct EmailCtrl;

impl EmailCtrl {
    pub async fn get_by_id(conn: &DatabaseConnection, id: i32) -> AppResult<email::Model> {
        Email::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Email {} not found", id)))
    }

    /// Fetch an email only if it belongs to `user_id`
    pub async fn get_for_user(
        conn: &DatabaseConnection,
        user_id: i32,
        id: i32,
    ) -> AppResult<email::Model> {
        Email::find_by_id(id)
            .filter(email::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Email {} not found", id)))
    }

    /// The flag only ever goes from false to true.
    pub async fn mark_embeddings_generated(conn: &DatabaseConnection, id: i32) -> AppResult<()> {
        Email::update_many()
            .col_expr(email::Column::EmbeddingsGenerated, Expr::value(true))
            .col_expr(email::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(email::Column::Id.eq(id))
            .filter(email::Column::EmbeddingsGenerated.eq(false))
            .exec(conn)
            .await?;
        Ok(())
    }

    pub async fn mark_tasks_generated<C: ConnectionTrait>(conn: &C, ids: &[i32]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = Email::update_many()
            .col_expr(email::Column::TasksGenerated, Expr::value(true))
            .col_expr(email::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(email::Column::Id.is_in(ids.iter().copied()))
            .filter(email::Column::TasksGenerated.eq(false))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Emails received at or after `since`, oldest first
    pub async fn list_since(
        conn: &DatabaseConnection,
        user_id: i32,
        since: DateTimeWithTimeZone,
    ) -> AppResult<Vec<email::Model>> {
        let emails = Email::find()
            .filter(email::Column::UserId.eq(user_id))
            .filter(email::Column::ReceivedAt.gte(since))
            .order_by_asc(email::Column::ReceivedAt)
            .order_by_asc(email::Column::Id)
            .all(conn)
            .await?;
        Ok(emails)
    }

    /// Embedded emails that have not been through task extraction yet
    pub async fn list_for_workflow(
        conn: &DatabaseConnection,
        user_id: i32,
        limit: u64,
    ) -> AppResult<Vec<email::Model>> {
        let emails = Email::find()
            .filter(email::Column::UserId.eq(user_id))
            .filter(email::Column::EmbeddingsGenerated.eq(true))
            .filter(email::Column::TasksGenerated.eq(false))
            .order_by_asc(email::Column::ReceivedAt)
            .order_by_asc(email::Column::Id)
            .limit(limit)
            .all(conn)
            .await?;
        Ok(emails)
    }

    /// Returns (with embeddings, without embeddings)
    pub async fn count_by_embedding_flag(
        conn: &DatabaseConnection,
        user_id: Option<i32>,
    ) -> AppResult<(u64, u64)> {
        let base = || {
            let mut query = Email::find();
            if let Some(user_id) = user_id {
                query = query.filter(email::Column::UserId.eq(user_id));
            }
            query
        };

        let with = base()
            .filter(email::Column::EmbeddingsGenerated.eq(true))
            .count(conn)
            .await?;
        let without = base()
            .filter(email::Column::EmbeddingsGenerated.eq(false))
            .count(conn)
            .await?;

        Ok((with, without))
    }
}
