use chrono::Utc;
use sea_orm::{Condition, ConnectionTrait, Statement};

use crate::{db_core::prelude::*, embed::task_state::TaskState, error::AppResult};

pub struct EmbeddingTaskCtrl;

impl EmbeddingTaskCtrl {
    /// Queue every email that has no embeddings and no task row yet
    pub async fn enqueue_missing(conn: &DatabaseConnection, limit: u64) -> AppResult<u64> {
        let result = conn
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO embedding_task (email_id, user_id, status, attempts)
                SELECT m.id, m.user_id, 'pending', 0
                FROM email m
                LEFT JOIN embedding_task t ON t.email_id = m.id
                WHERE NOT m.embeddings_generated
                    AND t.id IS NULL
                ORDER BY m.received_at DESC
                LIMIT $1
                ON CONFLICT (email_id) DO NOTHING
                "#,
                [(limit as i64).into()],
            ))
            .await?;

        Ok(result.rows_affected())
    }

    /// Atomically move up to `limit` due tasks to `processing`.
    ///
    /// Due means `pending`, or `failed` with `next_retry` in the past.
    /// Rows locked by a concurrent claimer are skipped.
    pub async fn claim_due(
        conn: &DatabaseConnection,
        limit: u64,
    ) -> AppResult<Vec<embedding_task::Model>> {
        let tasks = EmbeddingTask::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                UPDATE embedding_task
                SET status = 'processing', started_at = NOW(), updated_at = NOW()
                WHERE id IN (
                    SELECT id FROM embedding_task
                    WHERE status = 'pending'
                        OR (status = 'failed' AND (next_retry IS NULL OR next_retry <= NOW()))
                    ORDER BY next_retry ASC NULLS FIRST, id ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING *
                "#,
                [(limit as i64).into()],
            ))
            .all(conn)
            .await?;

        Ok(tasks)
    }

    /// Tasks stuck in `processing` since before `cutoff`
    pub async fn list_stale(
        conn: &DatabaseConnection,
        cutoff: DateTimeWithTimeZone,
    ) -> AppResult<Vec<embedding_task::Model>> {
        let tasks = EmbeddingTask::find()
            .filter(embedding_task::Column::Status.eq(EmbeddingTaskStatus::Processing))
            .filter(
                Condition::any()
                    .add(embedding_task::Column::StartedAt.is_null())
                    .add(embedding_task::Column::StartedAt.lt(cutoff)),
            )
            .all(conn)
            .await?;
        Ok(tasks)
    }

    /// Persist a transition computed by the state machine.
    ///
    /// `current` is the row as this worker last saw it. The update only
    /// applies while status, attempts and started_at are unchanged, so a
    /// worker whose task was recovered and claimed again elsewhere cannot
    /// overwrite the newer claim. Returns whether it applied.
    pub async fn apply(
        conn: &DatabaseConnection,
        current: &embedding_task::Model,
        next: &TaskState,
    ) -> AppResult<bool> {
        let update = embedding_task::ActiveModel {
            status: ActiveValue::Set(next.status),
            attempts: ActiveValue::Set(next.attempts),
            next_retry: ActiveValue::Set(next.next_retry),
            error_message: ActiveValue::Set(next.error_message.clone()),
            started_at: ActiveValue::Set(next.started_at),
            completed_at: ActiveValue::Set(next.completed_at),
            updated_at: ActiveValue::Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        let started_at = match current.started_at {
            Some(started_at) => embedding_task::Column::StartedAt.eq(started_at),
            None => embedding_task::Column::StartedAt.is_null(),
        };

        let result = EmbeddingTask::update_many()
            .set(update)
            .filter(embedding_task::Column::Id.eq(current.id))
            .filter(embedding_task::Column::Status.eq(current.status))
            .filter(embedding_task::Column::Attempts.eq(current.attempts))
            .filter(started_at)
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Put permanently failed tasks of a user back into the queue
    pub async fn reset_failed_permanently(conn: &DatabaseConnection, user_id: i32) -> AppResult<u64> {
        let reset = TaskState::pending();
        let update = embedding_task::ActiveModel {
            status: ActiveValue::Set(reset.status),
            attempts: ActiveValue::Set(reset.attempts),
            next_retry: ActiveValue::Set(reset.next_retry),
            error_message: ActiveValue::Set(reset.error_message),
            started_at: ActiveValue::Set(reset.started_at),
            completed_at: ActiveValue::Set(reset.completed_at),
            updated_at: ActiveValue::Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        let result = EmbeddingTask::update_many()
            .set(update)
            .filter(embedding_task::Column::UserId.eq(user_id))
            .filter(embedding_task::Column::Status.eq(EmbeddingTaskStatus::FailedPermanently))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }

    pub async fn count_by_status(
        conn: &DatabaseConnection,
        user_id: Option<i32>,
    ) -> AppResult<Vec<(EmbeddingTaskStatus, i64)>> {
        let mut query = EmbeddingTask::find()
            .select_only()
            .column(embedding_task::Column::Status)
            .column_as(Expr::col(embedding_task::Column::Id).count(), "count")
            .group_by(embedding_task::Column::Status);

        if let Some(user_id) = user_id {
            query = query.filter(embedding_task::Column::UserId.eq(user_id));
        }

        let counts = query
            .into_tuple::<(EmbeddingTaskStatus, i64)>()
            .all(conn)
            .await?;
        Ok(counts)
    }
}
