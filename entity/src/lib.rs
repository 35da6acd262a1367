pub mod prelude;

pub mod email;
pub mod email_embedding;
pub mod email_task;
pub mod embedding_task;
pub mod sea_orm_active_enums;
pub mod user_account;
