use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::env;

use entity::{email, embedding_task, user_account};

use crate::embed::task_state::TaskState;

/// Connect to `DATABASE_URL` and create a fresh user to scope the test's rows
pub async fn setup() -> (DatabaseConnection, i32) {
    dotenvy::dotenv().ok();
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .expect("Database connection failed");

    let user = user_account::ActiveModel {
        email: Set(format!(
            "test-{}@mailmind.test",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )),
        created_at: Set(Utc::now().fixed_offset()),
        ..Default::default()
    }
    .insert(&conn)
    .await
    .expect("Failed to create test user");

    (conn, user.id)
}

#[derive(Debug, Clone)]
pub struct NewEmail {
    pub thread_id: Option<String>,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub received_at: DateTime<FixedOffset>,
    pub importance_score: f64,
    pub category: Option<String>,
}

impl Default for NewEmail {
    fn default() -> Self {
        Self {
            thread_id: None,
            sender: "Alice <alice@example.com>".to_string(),
            recipients: vec!["me@example.com".to_string()],
            subject: "Quarterly report".to_string(),
            body_text: Some("Please review the attached report by Friday.".to_string()),
            received_at: Utc::now().fixed_offset(),
            importance_score: 0.5,
            category: None,
        }
    }
}

pub async fn insert_email(conn: &DatabaseConnection, user_id: i32, new: NewEmail) -> email::Model {
    let now = Utc::now().fixed_offset();
    email::ActiveModel {
        user_id: Set(user_id),
        message_id: Set(format!(
            "<{}@mailmind.test>",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )),
        thread_id: Set(new.thread_id),
        sender: Set(new.sender),
        recipients: Set(new.recipients),
        cc: Set(Vec::new()),
        subject: Set(new.subject),
        body_text: Set(new.body_text),
        body_html: Set(None),
        received_at: Set(new.received_at),
        importance_score: Set(new.importance_score),
        urgency_score: Set(0.0),
        category: Set(new.category),
        is_important: Set(false),
        is_flagged: Set(false),
        has_attachments: Set(false),
        tasks_generated: Set(false),
        embeddings_generated: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
    .expect("Failed to insert test email")
}

/// A unit vector of the configured dimension pointing along `axis`
pub fn axis_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; crate::server_config::cfg.embedding.dimensions];
    let len = v.len();
    v[axis % len] = 1.0;
    v
}

/// Queue row for `email` in an arbitrary state
pub async fn insert_task(
    conn: &DatabaseConnection,
    email: &email::Model,
    state: TaskState,
) -> embedding_task::Model {
    let now = Utc::now().fixed_offset();
    embedding_task::ActiveModel {
        email_id: Set(email.id),
        user_id: Set(email.user_id),
        status: Set(state.status),
        attempts: Set(state.attempts),
        next_retry: Set(state.next_retry),
        error_message: Set(state.error_message),
        started_at: Set(state.started_at),
        completed_at: Set(state.completed_at),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
    .expect("Failed to insert test task")
}
