pub use super::email::Entity as Email;
pub use super::email_embedding::Entity as EmailEmbedding;
pub use super::email_task::Entity as EmailTask;
pub use super::embedding_task::Entity as EmbeddingTask;
pub use super::user_account::Entity as UserAccount;
