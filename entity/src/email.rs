use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    /// Provider message id, unique per user
    pub message_id: String,
    /// Provider thread id, when the source exposes one
    pub thread_id: Option<String>,
    pub sender: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    #[sea_orm(column_type = "Text")]
    pub subject: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub body_text: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub body_html: Option<String>,
    pub received_at: DateTimeWithTimeZone,
    #[sea_orm(column_type = "Double")]
    pub importance_score: f64,
    #[sea_orm(column_type = "Double")]
    pub urgency_score: f64,
    pub category: Option<String>,
    pub is_important: bool,
    pub is_flagged: bool,
    pub has_attachments: bool,
    pub tasks_generated: bool,
    pub embeddings_generated: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_account::Entity",
        from = "Column::UserId",
        to = "super::user_account::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    UserAccount,
    #[sea_orm(has_many = "super::email_embedding::Entity")]
    EmailEmbedding,
    #[sea_orm(has_one = "super::embedding_task::Entity")]
    EmbeddingTask,
}

impl Related<super::user_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserAccount.def()
    }
}

impl Related<super::email_embedding::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailEmbedding.def()
    }
}

impl Related<super::embedding_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmbeddingTask.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
