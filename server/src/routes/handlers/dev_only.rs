//! Development-only handlers. These are only compiled in debug builds.

use axum::{extract::Query, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::generate_dev_token;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevTokenParams {
    #[serde(default = "default_user_id")]
    pub user_id: i32,
    #[serde(default = "default_email")]
    pub email: String,
}

fn default_user_id() -> i32 {
    1
}

fn default_email() -> String {
    "test@example.com".to_string()
}

#[derive(Serialize)]
struct DevTokenResponse {
    token: String,
}

pub async fn dev_token(Query(params): Query<DevTokenParams>) -> impl IntoResponse {
    match generate_dev_token(params.user_id, &params.email) {
        Ok(token) => (StatusCode::OK, Json(DevTokenResponse { token })).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token").into_response(),
    }
}
