use crate::models::UserHistory;
use crate::services::store::InteractionStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reduces a user's event log into seen products and engagement scores.
#[derive(Clone)]
pub struct HistoryAggregator {
    store: Arc<dyn InteractionStore>,
}

impl HistoryAggregator {
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self { store }
    }

    /// Never fails: a store error is logged and yields an empty history.
    pub async fn aggregate(&self, user_id: &str) -> UserHistory {
        match self.store.find_events(user_id).await {
            Ok(events) => {
                let history = UserHistory::from_events(&events);
                debug!(user_id, events = events.len(), seen = history.seen.len(), "Aggregated user history");
                history
            }
            Err(e) => {
                warn!(user_id, "Failed to load user history, continuing without it: {}", e);
                UserHistory::default()
            }
        }
    }
}
