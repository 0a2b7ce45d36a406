use crate::models::RecommendationResult;
use crate::services::recommendation::{RecommendError, RecommendationService};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Front door for recommendation requests; keeps serving counters.
pub struct ServingService {
    recommendation_service: Arc<RecommendationService>,
    serving_stats: Arc<DashMap<String, u64>>,
}

impl ServingService {
    pub fn new(recommendation_service: Arc<RecommendationService>) -> Self {
        Self {
            recommendation_service,
            serving_stats: Arc::new(DashMap::new()),
        }
    }

    pub async fn serve_recommendations(&self, user_id: &str) -> Result<RecommendationResult, RecommendError> {
        self.increment_stat("total_requests");
        let start_time = Instant::now();

        match self.recommendation_service.get_recommendations(user_id).await {
            Ok(result) => {
                let latency = start_time.elapsed().as_millis() as u64;
                self.update_latency_stat(latency);
                self.increment_stat("successful_requests");
                self.increment_stat(&format!("strategy_{}", result.strategy()));
                if result.recommendations.is_empty() {
                    self.increment_stat("empty_results");
                }

                info!("Served recommendations for user {} in {}ms", user_id, latency);
                Ok(result)
            }
            Err(e) => {
                error!("Failed to get recommendations for user {}: {}", user_id, e);
                self.increment_stat("failed_requests");
                Err(e)
            }
        }
    }

    pub fn get_serving_stats(&self) -> HashMap<String, u64> {
        self.serving_stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn increment_stat(&self, key: &str) {
        *self.serving_stats.entry(key.to_string()).or_insert(0) += 1;
    }

    fn update_latency_stat(&self, latency_ms: u64) {
        let current_avg = self.serving_stats.get("avg_latency_ms").map(|v| *v).unwrap_or(0);
        let served = self
            .serving_stats
            .get("successful_requests")
            .map(|v| *v)
            .unwrap_or(0)
            + 1;

        // Running mean over successful requests.
        let new_avg = (current_avg * (served - 1) + latency_ms) / served;
        self.serving_stats.insert("avg_latency_ms".to_string(), new_avg);

        let mut max = self.serving_stats.entry("max_latency_ms".to_string()).or_insert(0);
        if latency_ms > *max {
            *max = latency_ms;
        }
    }
}
