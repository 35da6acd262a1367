use std::sync::LazyLock;

use axum::{async_trait, extract::FromRequestParts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
#[cfg(any(debug_assertions, test))]
use chrono::Utc;
use http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

static KEYS: LazyLock<Keys> = LazyLock::new(|| {
    let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    Keys::new(&secret)
});

const ISSUER: &str = "mailmind";

pub const LONG_TTL: usize = 24 * 60 * 60; // 24 hours

/// Issue a token for local testing against a running server.
#[cfg(any(debug_assertions, test))]
pub fn generate_dev_token(user_id: i32, email: &str) -> Result<String, AuthError> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        iss: ISSUER.to_string(),
        exp: Utc::now().timestamp() as usize + LONG_TTL,
    };

    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &KEYS.encoding)
        .map_err(|_| AuthError::TokenCreation)
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &str) -> Self {
        let decoded_secret = hex::decode(secret).expect("Secret was not valid hex");
        Self {
            encoding: EncodingKey::from_secret(&decoded_secret),
            decoding: DecodingKey::from_secret(&decoded_secret),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    /// user_account id
    pub sub: i32,
    pub email: String,
    pub iss: String,
    pub exp: usize,
}

#[derive(Debug)]
pub(crate) enum AuthError {
    MissingCredentials,
    TokenCreation,
    InvalidToken,
}

fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    validation.set_issuer(&[ISSUER]);

    jsonwebtoken::decode::<Claims>(token, &KEYS.decoding, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("Error decoding token: {:?}", e);
            AuthError::InvalidToken
        })
}

#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingCredentials)?;

        Ok(decode_claims(bearer.token())?)
    }
}
