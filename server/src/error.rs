use anyhow::anyhow;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::derive::Display;
use num_derive::{FromPrimitive, ToPrimitive};
use sea_orm::sqlx::error::DatabaseError;
use serde_json::json;

use crate::{auth::jwt::AuthError, embed::task_state::TransitionError};

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug, Display)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
    RequestTimeout,
    TooManyRequests,
    DbError(sea_orm::error::DbErr),
    Conflict(String),
    Unauthorized(String),
    Forbidden(String),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        match error.status() {
            Some(StatusCode::BAD_REQUEST) => AppError::BadRequest(error.to_string()),
            Some(StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(StatusCode::TOO_MANY_REQUESTS) => AppError::TooManyRequests,
            _ => AppError::Internal(error.into()),
        }
    }
}

impl From<sea_orm::error::DbErr> for AppError {
    fn from(error: sea_orm::error::DbErr) -> Self {
        match database_error_code(&error) {
            Some(DatabaseErrorCode::UniqueViolation) => {
                AppError::Conflict("Resource already exists".to_string())
            }
            _ => AppError::DbError(error),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(error: TransitionError) -> Self {
        AppError::Conflict(error.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::TokenCreation => AppError::Internal(anyhow!("Error creating token")),
            AuthError::InvalidToken => AppError::Unauthorized("Invalid Token".to_string()),
            AuthError::MissingCredentials => {
                AppError::Unauthorized("Missing credentials".to_string())
            }
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(json!({"error": {
            "code": status.as_u16(),
            "message": message.into()
        }})),
    )
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::RequestTimeout => {
                error_body(StatusCode::REQUEST_TIMEOUT, "Request took too long")
            }
            AppError::TooManyRequests => {
                error_body(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
            }
            AppError::Unauthorized(msg) => error_body(StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => error_body(StatusCode::FORBIDDEN, msg),
            AppError::DbError(err) => {
                tracing::error!("Database error: {:?}", err);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
            AppError::Conflict(msg) => error_body(StatusCode::CONFLICT, msg),
        };
        if err.0.is_server_error() {
            tracing::error!("Error: {:?}", err.1);
        } else {
            tracing::debug!("Request rejected: {:?}", err.1);
        }

        err.into_response()
    }
}

#[allow(clippy::borrowed_box)]
fn get_code(error: &Box<dyn DatabaseError>) -> Option<u32> {
    error.code().and_then(|c| c.parse::<u32>().ok())
}

pub fn extract_database_error_code(err: &sea_orm::error::DbErr) -> Option<u32> {
    match err {
        sea_orm::error::DbErr::Query(sea_orm::error::RuntimeErr::SqlxError(
            sea_orm::sqlx::Error::Database(error),
        ))
        | sea_orm::error::DbErr::Exec(sea_orm::error::RuntimeErr::SqlxError(
            sea_orm::sqlx::Error::Database(error),
        )) => get_code(error),
        _ => None,
    }
}

#[derive(FromPrimitive, ToPrimitive, Debug, PartialEq, Eq)]
pub enum DatabaseErrorCode {
    UniqueViolation = 23505,
    ForeignKeyViolation = 23503,
}

/// Classify a database error by its Postgres SQLSTATE code, if it has one.
pub fn database_error_code(err: &sea_orm::error::DbErr) -> Option<DatabaseErrorCode> {
    extract_database_error_code(err).and_then(num_traits::FromPrimitive::from_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_code_from_primitive() {
        let code: Option<DatabaseErrorCode> = num_traits::FromPrimitive::from_u32(23505);
        assert_eq!(code, Some(DatabaseErrorCode::UniqueViolation));
        let code: Option<DatabaseErrorCode> = num_traits::FromPrimitive::from_u32(42);
        assert_eq!(code, None);
    }

    #[test]
    fn test_non_sqlx_errors_have_no_code() {
        let err = sea_orm::error::DbErr::Custom("boom".to_string());
        assert_eq!(extract_database_error_code(&err), None);
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::BadRequest("nope".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = AppError::Conflict("busy".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = AppError::Internal(anyhow!("hidden")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
