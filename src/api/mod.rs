use crate::auth::AuthUser;
use crate::config::CorsConfig;
use crate::error::{AppError, Result};
use crate::models::RecommendationResult;
use crate::AppState;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct RecommendationsResponse {
    success: bool,
    #[serde(flatten)]
    result: RecommendationResult,
}

async fn home() -> Json<Value> {
    Json(json!({
        "service": "shoprec recommendation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "recommendations": "/api/recommendations (GET, requires JWT)",
            "retrain": "/api/retrain (POST)",
            "status": "/api/status (GET)",
            "health": "/api/health (GET)"
        },
        "status": "running"
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Recommendation service is running",
        "model_loaded": state.snapshots.is_loaded(),
        "database_connected": state.status_service.database_connected().await,
    }))
}

async fn get_recommendations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<RecommendationsResponse>> {
    let result = state.serving_service.serve_recommendations(&user.user_id).await?;
    Ok(Json(RecommendationsResponse { success: true, result }))
}

async fn retrain_model(State(state): State<AppState>) -> Result<Json<Value>> {
    let summary = state.training_service.retrain().await?;
    Ok(Json(json!({
        "success": true,
        "message": "Model retrained successfully",
        "metadata": summary,
    })))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<Value>> {
    let report = state
        .status_service
        .report(state.serving_service.get_serving_stats())
        .await
        .map_err(|e| AppError::Status(format!("{:#}", e)))?;
    Ok(Json(json!({ "success": true, "status": report })))
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router {
    info!("Allowed CORS origins: {:?}", state.config.cors.allowed_origins);
    Router::new()
        .route("/", get(home))
        .route("/api/health", get(health_check))
        .route("/api/recommendations", get(get_recommendations))
        .route("/api/retrain", post(retrain_model))
        .route("/api/status", get(get_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors)),
        )
        .with_state(state)
}
