use crate::services::store::InteractionStore;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// How many overlapping users are consulted.
pub const MAX_PEERS: usize = 10;

/// Collaborative fallback for users the model was not trained on: finds users
/// who bought or carted the same products and surfaces what else they bought.
#[derive(Clone)]
pub struct PeerSimilarityFinder {
    store: Arc<dyn InteractionStore>,
}

/// Counts keyed by id, remembering the order each id was first met.
#[derive(Default)]
struct RankedCounts {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl RankedCounts {
    fn bump(&mut self, id: &str) {
        match self.counts.get_mut(id) {
            Some(count) => *count += 1,
            None => {
                self.order.push(id.to_string());
                self.counts.insert(id.to_string(), 1);
            }
        }
    }

    /// Highest count first; ties keep discovery order.
    fn ranked(self) -> Vec<String> {
        let Self { order, counts } = self;
        let mut ranked: Vec<(String, usize)> = order
            .into_iter()
            .map(|id| {
                let count = counts.get(&id).copied().unwrap_or_default();
                (id, count)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

impl PeerSimilarityFinder {
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self { store }
    }

    /// Never fails: lookup errors are logged and yield an empty list.
    pub async fn recommend(&self, user_id: &str, seen: &HashSet<String>, limit: usize) -> Vec<String> {
        match self.try_recommend(user_id, seen, limit).await {
            Ok(products) => products,
            Err(e) => {
                warn!(user_id, "Similar-user lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_recommend(&self, user_id: &str, seen: &HashSet<String>, limit: usize) -> Result<Vec<String>> {
        let own_events = self.store.find_events(user_id).await?;
        let mut strong_products = Vec::new();
        let mut strong_set = HashSet::new();
        for event in own_events.iter().filter(|e| e.action.is_strong_signal()) {
            if strong_set.insert(event.product_id.clone()) {
                strong_products.push(event.product_id.clone());
            }
        }

        if strong_products.is_empty() {
            debug!(user_id, "No purchase or cart signal to expand from");
            return Ok(Vec::new());
        }

        // Rank peers by how many of the user's strong products they also acted on.
        let overlapping = self
            .store
            .find_strong_events_for_products(&strong_products)
            .await?;
        let mut peer_products: HashSet<(String, String)> = HashSet::new();
        let mut peer_overlap = RankedCounts::default();
        for event in overlapping {
            if event.user_id == user_id || !strong_set.contains(&event.product_id) {
                continue;
            }
            if peer_products.insert((event.user_id.clone(), event.product_id.clone())) {
                peer_overlap.bump(&event.user_id);
            }
        }

        let peers: Vec<String> = peer_overlap.ranked().into_iter().take(MAX_PEERS).collect();
        if peers.is_empty() {
            debug!(user_id, "No overlapping users found");
            return Ok(Vec::new());
        }

        let mut favored = RankedCounts::default();
        for event in self.store.find_strong_events_for_users(&peers).await? {
            favored.bump(&event.product_id);
        }

        let recommendations: Vec<String> = favored
            .ranked()
            .into_iter()
            .filter(|product_id| !seen.contains(product_id))
            .take(limit)
            .collect();

        debug!(user_id, peers = peers.len(), found = recommendations.len(), "Similar-user recommendations");
        Ok(recommendations)
    }
}
