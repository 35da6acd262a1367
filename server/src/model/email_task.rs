use chrono::{NaiveDate, Utc};
use sea_orm::{DatabaseTransaction, TransactionError};

use crate::{
    db_core::prelude::*,
    error::{AppError, AppResult},
    model::email::EmailCtrl,
};

pub struct EmailTaskCtrl;

#[derive(Debug, Clone)]
pub struct NewEmailTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
}

impl EmailTaskCtrl {
    /// Store the tasks of one email group and flag its emails as processed,
    /// all or nothing.
    pub async fn store_for_group(
        conn: &DatabaseConnection,
        user_id: i32,
        group_key: &str,
        email_ids: &[i32],
        tasks: Vec<NewEmailTask>,
    ) -> AppResult<usize> {
        let group_key = group_key.to_string();
        let email_ids = email_ids.to_vec();

        let stored = conn
            .transaction::<_, usize, AppError>(|txn| {
                Box::pin(async move {
                    Self::store_in_txn(txn, user_id, &group_key, &email_ids, tasks).await
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => AppError::DbError(db_err),
                TransactionError::Transaction(app_err) => app_err,
            })?;

        Ok(stored)
    }

    async fn store_in_txn(
        txn: &DatabaseTransaction,
        user_id: i32,
        group_key: &str,
        email_ids: &[i32],
        tasks: Vec<NewEmailTask>,
    ) -> AppResult<usize> {
        let count = tasks.len();
        let now = Utc::now().fixed_offset();

        if !tasks.is_empty() {
            let models = tasks.into_iter().map(|task| email_task::ActiveModel {
                user_id: ActiveValue::Set(user_id),
                group_key: ActiveValue::Set(group_key.to_string()),
                title: ActiveValue::Set(task.title),
                description: ActiveValue::Set(task.description),
                due_date: ActiveValue::Set(task.due_date),
                priority: ActiveValue::Set(task.priority),
                source_email_ids: ActiveValue::Set(email_ids.to_vec()),
                created_at: ActiveValue::Set(now),
                ..Default::default()
            });
            EmailTask::insert_many(models).exec(txn).await?;
        }

        EmailCtrl::mark_tasks_generated(txn, email_ids).await?;

        Ok(count)
    }

    pub async fn list_for_user(
        conn: &DatabaseConnection,
        user_id: i32,
    ) -> AppResult<Vec<email_task::Model>> {
        let tasks = EmailTask::find()
            .filter(email_task::Column::UserId.eq(user_id))
            .order_by_desc(email_task::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(tasks)
    }
}
