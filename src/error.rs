use crate::auth::AuthError;
use crate::services::recommendation::RecommendError;
use crate::services::training::RetrainError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Recommend(#[from] RecommendError),

    #[error(transparent)]
    Retrain(#[from] RetrainError),

    #[error("Status check failed: {0}")]
    Status(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(AuthError::Missing | AuthError::Expired) => StatusCode::UNAUTHORIZED,
            AppError::Auth(AuthError::Invalid(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Recommend(RecommendError::ModelUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Retrain(RetrainError::AlreadyRunning) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            AppError::Auth(AuthError::Invalid(details)) => json!({
                "success": false,
                "message": "Token is invalid.",
                "error_details": details,
            }),
            AppError::Recommend(RecommendError::CatalogUnavailable(_)) => json!({
                "success": false,
                "message": "An error occurred while generating recommendations",
            }),
            AppError::Retrain(RetrainError::AlreadyRunning) => json!({
                "success": false,
                "message": "A retrain is already in progress",
            }),
            AppError::Retrain(RetrainError::Timeout(_)) => json!({
                "success": false,
                "message": "Training timeout - please try again or check your data size",
            }),
            AppError::Retrain(RetrainError::NonZeroExit { stderr, .. }) => {
                let error = if stderr.trim().is_empty() {
                    "Unknown training error"
                } else {
                    stderr.as_str()
                };
                json!({
                    "success": false,
                    "message": "Model training failed",
                    "error": error,
                })
            }
            AppError::Retrain(e) => json!({
                "success": false,
                "message": format!("Retraining error: {}", e),
            }),
            other => json!({
                "success": false,
                "message": other.to_string(),
            }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, Json(self.body())).into_response()
    }
}
