use crate::models::{ModelPerformance, TrainingMembership};
use crate::services::snapshot::SnapshotHandle;
use crate::services::store::{CatalogStore, InteractionStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Catalog growth beyond this factor of the trained product count.
const CATALOG_GROWTH_FACTOR: f64 = 1.1;
/// Event volume growth beyond this factor of the trained event count.
const INTERACTION_GROWTH_FACTOR: f64 = 1.5;
const MAX_MODEL_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainAssessment {
    pub needs_retraining: bool,
    pub reasons: Vec<String>,
}

/// Decides whether the live snapshot is due for retraining. Reasons are
/// additive; no snapshot at all always needs one.
pub fn assess(
    current_products: usize,
    events_count: u64,
    membership: Option<&TrainingMembership>,
    now: DateTime<Utc>,
) -> RetrainAssessment {
    let Some(membership) = membership else {
        return RetrainAssessment {
            needs_retraining: true,
            reasons: vec!["No model found".to_string()],
        };
    };

    let mut reasons = Vec::new();
    if current_products as f64 > membership.product_ids.len() as f64 * CATALOG_GROWTH_FACTOR {
        reasons.push("New products added".to_string());
    }
    if events_count as f64 > membership.total_events as f64 * INTERACTION_GROWTH_FACTOR {
        reasons.push("Significant new user interactions".to_string());
    }
    let days_old = now.signed_duration_since(membership.trained_at).num_days();
    if days_old > MAX_MODEL_AGE_DAYS {
        reasons.push(format!("Model is {} days old", days_old));
    }

    RetrainAssessment {
        needs_retraining: !reasons.is_empty(),
        reasons,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatus {
    pub total_products: usize,
    pub trained_products: usize,
    pub new_products: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    pub trained_users: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionStatus {
    pub total_events: u64,
    pub events_in_training: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub last_trained: Option<DateTime<Utc>>,
    pub performance: Option<ModelPerformance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub model_loaded: bool,
    pub database_connected: bool,
    pub service_ready: bool,
    pub catalog: CatalogStatus,
    pub users: UserStatus,
    pub interactions: InteractionStatus,
    pub model_info: ModelInfo,
    pub maintenance: RetrainAssessment,
    pub serving: HashMap<String, u64>,
}

pub struct StatusService {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogStore>,
    snapshots: Arc<SnapshotHandle>,
}

impl StatusService {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        snapshots: Arc<SnapshotHandle>,
    ) -> Self {
        Self {
            interactions,
            catalog,
            snapshots,
        }
    }

    pub async fn database_connected(&self) -> bool {
        match self.interactions.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Interaction store ping failed: {}", e);
                false
            }
        }
    }

    /// Fails only when the catalog or the event count cannot be read.
    pub async fn report(&self, serving: HashMap<String, u64>) -> Result<StatusReport> {
        let snapshot = self.snapshots.current();
        let (products, events_count) =
            futures::try_join!(self.catalog.list_product_ids(), self.interactions.count_all_events())?;

        let membership = snapshot.as_ref().map(|s| &s.membership);
        let trained_products = membership.map(|m| m.product_ids.len()).unwrap_or_default();
        let maintenance = assess(products.len(), events_count, membership, Utc::now());
        debug!(needs_retraining = maintenance.needs_retraining, "Assessed model freshness");

        Ok(StatusReport {
            model_loaded: snapshot.is_some(),
            database_connected: true,
            service_ready: snapshot.is_some(),
            catalog: CatalogStatus {
                total_products: products.len(),
                trained_products,
                new_products: products.len().saturating_sub(trained_products),
            },
            users: UserStatus {
                trained_users: membership.map(|m| m.user_ids.len()).unwrap_or_default(),
            },
            interactions: InteractionStatus {
                total_events: events_count,
                events_in_training: membership.map(|m| m.total_events).unwrap_or_default(),
            },
            model_info: ModelInfo {
                last_trained: membership.map(|m| m.trained_at),
                performance: membership.map(|m| m.model_params.clone()),
            },
            maintenance,
            serving,
        })
    }
}
