use chrono::NaiveDate;
use entity::email;
use indoc::formatdoc;
use serde::{Deserialize, Serialize};

use crate::{
    embed::content::clean_body,
    error::AppResult,
    model::email_task::NewEmailTask,
    prompt::ollama::OllamaChat,
    util::truncate_chars,
};

const MAX_BODY_CHARS: usize = 2000;

pub fn system_prompt() -> String {
    formatdoc! {r#"
        You are a helpful assistant that extracts actionable tasks from a group of related emails.
        The emails belong to the same conversation or topic. Read them together and identify the tasks, action items, or to-dos that the recipient should complete.
        Merge duplicates: a task that is mentioned in several emails is one task.

        For each task found, extract:
        - title: A brief, actionable title for the task
        - description: Additional context or details (optional)
        - due_date: Any mentioned deadline in ISO 8601 format YYYY-MM-DD (optional)
        - priority: "high", "medium", or "low" based on urgency indicators (optional)

        If no actionable tasks are found, return an empty array.
        Respond only with a JSON object containing a "tasks" array. Do not provide explanations."#}
}

/// Build the user prompt listing every email of the group, oldest first
pub fn group_user_prompt(emails: &[&email::Model]) -> String {
    let mut prompt = String::from("Extract any actionable tasks from the following emails.\n");
    for email in emails {
        let body = clean_body(email.body_text.as_deref(), email.body_html.as_deref());
        prompt.push_str(&format!(
            "<email>\n<from>{}</from>\n<date>{}</date>\n<subject>{}</subject>\n<body>{}</body>\n</email>\n",
            email.sender,
            email.received_at.format("%Y-%m-%d"),
            email.subject,
            truncate_chars(&body, MAX_BODY_CHARS)
        ));
    }
    prompt
}

pub async fn extract_group_tasks(
    chat: &OllamaChat,
    emails: &[&email::Model],
) -> AppResult<TaskExtractionResponse> {
    let resp = chat
        .chat_json(&system_prompt(), &group_user_prompt(emails))
        .await?;

    let tasks = match serde_json::from_str::<TasksJson>(&resp.content) {
        Ok(TasksJson { tasks }) => tasks,
        Err(e) => {
            tracing::warn!("Could not parse task extraction JSON response: {:?}", e);
            vec![]
        }
    };

    Ok(TaskExtractionResponse {
        tasks,
        token_usage: resp.token_usage,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskExtractionResponse {
    pub tasks: Vec<ExtractedTask>,
    pub token_usage: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "dueDate", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl ExtractedTask {
    /// Validated row for storage; `None` for tasks without a title.
    /// Unparsable dates and unknown priorities are dropped.
    pub fn into_new_task(self) -> Option<NewEmailTask> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }

        let due_date = self
            .due_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

        let priority = self
            .priority
            .map(|p| p.trim().to_lowercase())
            .filter(|p| matches!(p.as_str(), "high" | "medium" | "low"));

        Some(NewEmailTask {
            title: title.to_string(),
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            due_date,
            priority,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TasksJson {
    tasks: Vec<ExtractedTask>,
}
