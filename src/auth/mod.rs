//! Bearer-token authentication for the recommendation endpoint.
//!
//! Tokens are issued by the storefront backend and signed with a shared
//! HS256 secret. The user id lives in a configurable claim (`_id` by default).

use crate::config::AuthConfig;
use crate::utils::validation::validate_identifier;
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("Authorization required")]
    Missing,
    #[error("Token has expired")]
    Expired,
    #[error("Token is invalid: {0}")]
    Invalid(String),
}

pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    identity_claim: String,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            identity_claim: config.identity_claim.clone(),
        }
    }

    /// Returns the user id carried by `token`.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?;

        let user_id = match data.claims.get(&self.identity_claim) {
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(AuthError::Invalid(format!(
                    "claim '{}' is not a string",
                    self.identity_claim
                )))
            }
            None => {
                return Err(AuthError::Invalid(format!(
                    "missing claim '{}'",
                    self.identity_claim
                )))
            }
        };

        validate_identifier("user", &user_id).map_err(|e| AuthError::Invalid(e.to_string()))?;
        Ok(user_id)
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Missing)?;
    match value.strip_prefix("Bearer ").map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::Missing),
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = crate::error::AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let user_id = verifier.verify(token).map_err(|e| {
            debug!("Rejected token: {}", e);
            e
        })?;
        Ok(AuthUser { user_id })
    }
}
