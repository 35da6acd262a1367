//! Email embedding service: variant generation and the retry queue

use std::panic::AssertUnwindSafe;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use entity::{email, embedding_task, sea_orm_active_enums::EmbeddingTaskStatus};
use futures::{stream, FutureExt, StreamExt};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::{
    embed::{
        content::{prepare_variants, EmailContent},
        task_state::{RetryPolicy, TaskEvent, TaskState},
        EmbeddingClient,
    },
    error::AppResult,
    model::{
        email::EmailCtrl,
        email_embedding::{EmailEmbeddingCtrl, EmbeddingInsert},
        embedding_task::EmbeddingTaskCtrl,
    },
    server_config::cfg,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingOutcome {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub recovered: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub failed_permanently: usize,
}

impl BatchReport {
    fn record(&mut self, status: EmbeddingTaskStatus) {
        match status {
            EmbeddingTaskStatus::Completed => self.completed += 1,
            EmbeddingTaskStatus::Failed => self.failed += 1,
            EmbeddingTaskStatus::FailedPermanently => self.failed_permanently += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub failed_permanently: i64,
    pub emails_with_embeddings: u64,
    pub emails_without_embeddings: u64,
    pub total_embeddings: u64,
}

impl EmbeddingStats {
    fn set_status_count(&mut self, status: EmbeddingTaskStatus, count: i64) {
        match status {
            EmbeddingTaskStatus::Pending => self.pending = count,
            EmbeddingTaskStatus::Processing => self.processing = count,
            EmbeddingTaskStatus::Completed => self.completed = count,
            EmbeddingTaskStatus::Failed => self.failed = count,
            EmbeddingTaskStatus::FailedPermanently => self.failed_permanently = count,
        }
    }
}

#[derive(Clone)]
pub struct EmailEmbeddingService {
    conn: DatabaseConnection,
    client: EmbeddingClient,
    policy: RetryPolicy,
}

impl EmailEmbeddingService {
    pub fn new(conn: DatabaseConnection, client: EmbeddingClient) -> Self {
        Self {
            conn,
            client,
            policy: RetryPolicy::from(&cfg.embedding),
        }
    }

    /// Embed every content variant of an email that is not stored yet.
    ///
    /// `embeddings_generated` is only set once all variants are stored; any
    /// failure returns early and leaves it untouched.
    pub async fn generate_for_email(&self, email: &email::Model) -> Result<EmbeddingOutcome> {
        let mut outcome = EmbeddingOutcome::default();

        for variant in prepare_variants(EmailContent::from(email)) {
            let exists = EmailEmbeddingCtrl::exists(
                &self.conn,
                email.id,
                variant.embedding_type,
                &variant.content_hash,
            )
            .await?;
            if exists {
                outcome.skipped += 1;
                continue;
            }

            let embedding = self.client.embed(&variant.text).await.with_context(|| {
                format!(
                    "Failed to embed {} variant of email {}",
                    variant.embedding_type.as_str(),
                    email.id
                )
            })?;

            let inserted = EmailEmbeddingCtrl::insert(
                &self.conn,
                EmbeddingInsert {
                    email_id: email.id,
                    user_id: email.user_id,
                    embedding_type: variant.embedding_type,
                    content_hash: variant.content_hash,
                    model: self.client.model().to_string(),
                    embedding,
                },
            )
            .await?;

            if inserted {
                outcome.created += 1;
            } else {
                // Stored by a concurrent worker in the meantime
                outcome.skipped += 1;
            }
        }

        EmailCtrl::mark_embeddings_generated(&self.conn, email.id).await?;

        Ok(outcome)
    }

    pub async fn enqueue_missing(&self, limit: u64) -> AppResult<u64> {
        EmbeddingTaskCtrl::enqueue_missing(&self.conn, limit).await
    }

    /// Fail tasks whose worker never reported back
    async fn recover_stale(&self) -> Result<usize> {
        let now = Utc::now().fixed_offset();
        let stale = EmbeddingTaskCtrl::list_stale(&self.conn, now - self.policy.stale_after()).await?;

        let mut recovered = 0;
        for task in stale {
            let next = TaskState::from(&task).transition(TaskEvent::Recover, now, &self.policy)?;
            if EmbeddingTaskCtrl::apply(&self.conn, &task, &next).await? {
                tracing::warn!(
                    "Recovered stale embedding task {} for email {} (attempt {})",
                    task.id,
                    task.email_id,
                    next.attempts
                );
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn run_task(&self, task: &embedding_task::Model) -> Result<EmbeddingOutcome> {
        let email = EmailCtrl::get_by_id(&self.conn, task.email_id).await?;
        self.generate_for_email(&email).await
    }

    /// Record the result of a claimed task. Returns the status it ended in.
    async fn finish_task(
        &self,
        task: &embedding_task::Model,
        result: Result<EmbeddingOutcome>,
    ) -> Result<EmbeddingTaskStatus> {
        let now = Utc::now().fixed_offset();
        let event = match result {
            Ok(outcome) => {
                tracing::debug!(
                    "Embedded email {}: {} created, {} skipped",
                    task.email_id,
                    outcome.created,
                    outcome.skipped
                );
                TaskEvent::Succeed
            }
            Err(e) => {
                tracing::error!("Embedding task {} for email {} failed: {:#}", task.id, task.email_id, e);
                TaskEvent::Fail(format!("{:#}", e))
            }
        };

        let next = TaskState::from(task).transition(event, now, &self.policy)?;
        let applied = EmbeddingTaskCtrl::apply(&self.conn, task, &next).await?;
        if !applied {
            tracing::warn!("Embedding task {} changed while it was processing", task.id);
        }

        Ok(next.status)
    }

    /// Recover stale tasks, then claim and process one batch of due tasks
    /// with bounded concurrency.
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let mut report = BatchReport {
            recovered: self.recover_stale().await?,
            ..Default::default()
        };

        if self.client.is_backing_off() {
            tracing::info!("Embedding server is backing off, not claiming new tasks");
            return Ok(report);
        }

        let tasks = EmbeddingTaskCtrl::claim_due(&self.conn, cfg.embedding.batch_size).await?;
        report.claimed = tasks.len();
        if tasks.is_empty() {
            return Ok(report);
        }

        let statuses = stream::iter(tasks)
            .map(|task| async move {
                let result = AssertUnwindSafe(self.run_task(&task))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("Embedding worker panicked")));

                match self.finish_task(&task, result).await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        tracing::error!("Failed to record embedding task {}: {:?}", task.id, e);
                        None
                    }
                }
            })
            .buffer_unordered(cfg.embedding.max_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for status in statuses.into_iter().flatten() {
            report.record(status);
        }

        Ok(report)
    }

    pub async fn stats(&self, user_id: Option<i32>) -> AppResult<EmbeddingStats> {
        let mut stats = EmbeddingStats::default();

        for (status, count) in EmbeddingTaskCtrl::count_by_status(&self.conn, user_id).await? {
            stats.set_status_count(status, count);
        }

        let (with, without) = EmailCtrl::count_by_embedding_flag(&self.conn, user_id).await?;
        stats.emails_with_embeddings = with;
        stats.emails_without_embeddings = without;
        stats.total_embeddings = EmailEmbeddingCtrl::count_for_user(&self.conn, user_id).await?;

        Ok(stats)
    }

    pub async fn retry_permanently_failed(&self, user_id: i32) -> AppResult<u64> {
        let reset = EmbeddingTaskCtrl::reset_failed_permanently(&self.conn, user_id).await?;
        if reset > 0 {
            tracing::info!("Reset {} permanently failed embedding tasks for user {}", reset, user_id);
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report_counts_final_statuses() {
        let mut report = BatchReport::default();
        for status in [
            EmbeddingTaskStatus::Completed,
            EmbeddingTaskStatus::Completed,
            EmbeddingTaskStatus::Failed,
            EmbeddingTaskStatus::FailedPermanently,
            EmbeddingTaskStatus::Processing,
        ] {
            report.record(status);
        }
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_permanently, 1);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let mut stats = EmbeddingStats::default();
        stats.set_status_count(EmbeddingTaskStatus::FailedPermanently, 3);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["failedPermanently"], 3);
        assert_eq!(json["emailsWithEmbeddings"], 0);
    }
}
