pub mod email;
pub mod email_embedding;
pub mod email_task;
pub mod embedding_task;
