use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which part of an email a stored vector was computed from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingType {
    #[sea_orm(string_value = "subject")]
    Subject,
    #[sea_orm(string_value = "body")]
    Body,
    #[sea_orm(string_value = "combined")]
    Combined,
    #[sea_orm(string_value = "summary")]
    Summary,
}

impl EmbeddingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingType::Subject => "subject",
            EmbeddingType::Body => "body",
            EmbeddingType::Combined => "combined",
            EmbeddingType::Summary => "summary",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTaskStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "failed_permanently")]
    FailedPermanently,
}

impl EmbeddingTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingTaskStatus::Pending => "pending",
            EmbeddingTaskStatus::Processing => "processing",
            EmbeddingTaskStatus::Completed => "completed",
            EmbeddingTaskStatus::Failed => "failed",
            EmbeddingTaskStatus::FailedPermanently => "failed_permanently",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EmbeddingTaskStatus::Completed | EmbeddingTaskStatus::FailedPermanently
        )
    }
}
