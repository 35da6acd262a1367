pub use entity::prelude::*;
pub use entity::sea_orm_active_enums::*;
pub use entity::{email, email_embedding, email_task, embedding_task, user_account};
pub use sea_orm::prelude::*;
pub use sea_orm::{
    sea_query::{Alias, Expr, OnConflict, Query},
    ActiveValue, DatabaseConnection, DbBackend, FromQueryResult, Order, QueryOrder, QuerySelect,
    Statement, TransactionTrait,
};
