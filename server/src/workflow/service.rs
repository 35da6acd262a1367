use std::collections::HashMap;

use entity::{email, sea_orm_active_enums::EmbeddingType};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::{
    error::AppResult,
    model::{
        email::EmailCtrl,
        email_embedding::EmailEmbeddingCtrl,
        email_task::{EmailTaskCtrl, NewEmailTask},
    },
    prompt::{ollama::OllamaChat, task_extraction::extract_group_tasks},
    server_config::cfg,
    workflow::grouping::{group_emails, EmailGroup},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub emails: usize,
    pub groups: usize,
    pub groups_failed: usize,
    pub tasks_created: usize,
    pub token_usage: i64,
}

#[derive(Clone)]
pub struct WorkflowService {
    conn: DatabaseConnection,
    chat: OllamaChat,
}

impl WorkflowService {
    pub fn new(conn: DatabaseConnection, chat: OllamaChat) -> Self {
        Self { conn, chat }
    }

    /// Group the user's embedded but unprocessed emails and extract tasks
    /// per group. A group that fails is left unflagged for the next run.
    pub async fn run_for_user(&self, user_id: i32) -> AppResult<WorkflowReport> {
        let emails =
            EmailCtrl::list_for_workflow(&self.conn, user_id, cfg.workflow.max_emails).await?;
        let mut report = WorkflowReport {
            emails: emails.len(),
            ..Default::default()
        };
        if emails.is_empty() {
            return Ok(report);
        }

        let ids: Vec<i32> = emails.iter().map(|e| e.id).collect();
        let embeddings =
            EmailEmbeddingCtrl::vectors_for_emails(&self.conn, &ids, EmbeddingType::Combined)
                .await?;

        let groups = group_emails(&emails, &embeddings, &cfg.workflow);
        report.groups = groups.len();

        let by_id: HashMap<i32, &email::Model> = emails.iter().map(|e| (e.id, e)).collect();

        for group in &groups {
            let members: Vec<&email::Model> = group
                .email_ids
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();

            match self.process_group(user_id, group, &members).await {
                Ok((created, tokens)) => {
                    report.tasks_created += created;
                    report.token_usage += tokens;
                }
                Err(e) => {
                    tracing::error!(
                        "Task extraction failed for group {} of user {}: {:?}",
                        group.key,
                        user_id,
                        e
                    );
                    report.groups_failed += 1;
                }
            }
        }

        tracing::info!(
            "Workflow for user {}: {} emails, {} groups ({} failed), {} tasks",
            user_id,
            report.emails,
            report.groups,
            report.groups_failed,
            report.tasks_created
        );

        Ok(report)
    }

    async fn process_group(
        &self,
        user_id: i32,
        group: &EmailGroup,
        members: &[&email::Model],
    ) -> AppResult<(usize, i64)> {
        let extraction = extract_group_tasks(&self.chat, members).await?;
        let tasks: Vec<NewEmailTask> = extraction
            .tasks
            .into_iter()
            .filter_map(|task| task.into_new_task())
            .collect();

        let created = EmailTaskCtrl::store_for_group(
            &self.conn,
            user_id,
            &group.key,
            &group.email_ids,
            tasks,
        )
        .await?;

        Ok((created, extraction.token_usage))
    }
}
