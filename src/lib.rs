pub mod algorithms;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::AppError;
pub use models::*;

use anyhow::Result;
use auth::JwtVerifier;
use axum::extract::FromRef;
use services::recommendation::RecommendationService;
use services::serving::ServingService;
use services::snapshot::{FileSnapshotProvider, SnapshotHandle, SnapshotProvider};
use services::status::StatusService;
use services::store::{CatalogStore, InteractionStore, PgCatalogStore, PgInteractionStore};
use services::training::{ProcessRetrainExecutor, RetrainExecutor, TrainingService};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub snapshots: Arc<SnapshotHandle>,
    pub serving_service: Arc<ServingService>,
    pub training_service: Arc<TrainingService>,
    pub status_service: Arc<StatusService>,
    pub verifier: Arc<JwtVerifier>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let pool = utils::retry_with_backoff(
            || services::store::postgres::connect(&config.postgres),
            config.postgres.connect_retries,
            Duration::from_millis(500),
        )
        .await?;

        let interactions: Arc<dyn InteractionStore> = Arc::new(PgInteractionStore::new(pool.clone()));
        let catalog: Arc<dyn CatalogStore> = Arc::new(PgCatalogStore::new(pool));

        let provider = Arc::new(FileSnapshotProvider::new(config.model.snapshot_path()));
        let snapshots = Arc::new(SnapshotHandle::default());
        match provider.load() {
            Ok(Some(snapshot)) => {
                snapshots.swap(snapshot);
            }
            Ok(None) => warn!(
                "No model snapshot at {}, serving is disabled until a retrain succeeds",
                provider.path().display()
            ),
            Err(e) => warn!("Failed to load model snapshot: {:#}", e),
        }

        let executor = Arc::new(ProcessRetrainExecutor::from_config(&config));
        Ok(Self::from_parts(config, interactions, catalog, snapshots, provider, executor))
    }

    /// Wires the services over already-built stores and snapshot plumbing.
    pub fn from_parts(
        config: Config,
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        snapshots: Arc<SnapshotHandle>,
        provider: Arc<dyn SnapshotProvider>,
        executor: Arc<dyn RetrainExecutor>,
    ) -> Self {
        let recommendation_service = Arc::new(RecommendationService::new(
            interactions.clone(),
            catalog.clone(),
            snapshots.clone(),
        ));
        let serving_service = Arc::new(ServingService::new(recommendation_service));
        let training_service = Arc::new(TrainingService::new(executor, provider, snapshots.clone()));
        let status_service = Arc::new(StatusService::new(interactions, catalog, snapshots.clone()));
        let verifier = Arc::new(JwtVerifier::new(&config.auth));

        info!(model_loaded = snapshots.is_loaded(), "Application state ready");
        Self {
            config: Arc::new(config),
            snapshots,
            serving_service,
            training_service,
            status_service,
            verifier,
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
