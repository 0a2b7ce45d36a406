//! The recommendation cascade.
//!
//! Stages run in a fixed order, from the most informed signal to the least:
//! model predictions (or similar users for untrained users), exploration of
//! products added since training, popularity backfill, the user's own
//! favorites, and finally random catalog picks. Each stage only fires when
//! the stages before it left the list short.

use crate::algorithms::RatingPredictor;
use crate::models::{Catalog, RecommendationMetadata, RecommendationResult, Strategy, UserHistory};
use crate::services::history::HistoryAggregator;
use crate::services::peers::PeerSimilarityFinder;
use crate::services::snapshot::{ModelSnapshot, SnapshotHandle};
use crate::services::store::{CatalogStore, InteractionStore};
use crate::utils::{dedup_preserving_order, shuffle_take};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Size of a full recommendation list.
pub const TARGET_COUNT: usize = 10;
/// Popularity backfill runs while fewer than this many items are collected.
pub const BACKFILL_TRIGGER: usize = 8;
pub const EXPLORATION_SLOTS: usize = 3;
pub const ML_SLOTS: usize = 6;
pub const COLLABORATIVE_SLOTS: usize = 5;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("Recommendation service is not ready. Please train the model first.")]
    ModelUnavailable,
    #[error("catalog store unavailable: {0}")]
    CatalogUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Model,
    Exploration,
    PopularityBackfill,
    Favorites,
    RandomFallback,
}

const PIPELINE: [Stage; 5] = [
    Stage::Model,
    Stage::Exploration,
    Stage::PopularityBackfill,
    Stage::Favorites,
    Stage::RandomFallback,
];

/// How a stage's contribution affects the reported strategy.
#[derive(Debug, Clone, Copy)]
enum Labeling {
    Set(Strategy),
    IfUnset(Strategy),
    Keep,
}

struct Contribution {
    items: Vec<String>,
    labeling: Labeling,
}

struct RequestContext<'a> {
    user_id: &'a str,
    history: UserHistory,
    catalog: Catalog,
    snapshot: Arc<ModelSnapshot>,
}

pub struct RecommendationService {
    history: HistoryAggregator,
    peers: PeerSimilarityFinder,
    catalog: Arc<dyn CatalogStore>,
    snapshots: Arc<SnapshotHandle>,
}

impl RecommendationService {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        snapshots: Arc<SnapshotHandle>,
    ) -> Self {
        Self {
            history: HistoryAggregator::new(interactions.clone()),
            peers: PeerSimilarityFinder::new(interactions),
            catalog,
            snapshots,
        }
    }

    pub async fn get_recommendations(&self, user_id: &str) -> Result<RecommendationResult, RecommendError> {
        let mut rng = StdRng::from_entropy();
        self.get_recommendations_with_rng(user_id, &mut rng).await
    }

    /// Same as [`get_recommendations`](Self::get_recommendations) with a caller-supplied RNG
    /// for the exploration and random stages.
    pub async fn get_recommendations_with_rng<R: Rng + Send>(
        &self,
        user_id: &str,
        rng: &mut R,
    ) -> Result<RecommendationResult, RecommendError> {
        // Pin one snapshot for the whole request.
        let snapshot = self
            .snapshots
            .current()
            .ok_or(RecommendError::ModelUnavailable)?;

        let (history, catalog) =
            futures::join!(self.history.aggregate(user_id), self.catalog.list_product_ids());
        let catalog = Catalog::new(catalog.map_err(|e| RecommendError::CatalogUnavailable(e.to_string()))?);

        let ctx = RequestContext {
            user_id,
            history,
            catalog,
            snapshot,
        };

        let mut recommendations: Vec<String> = Vec::new();
        let mut strategy: Option<Strategy> = None;

        for stage in PIPELINE {
            let Some(contribution) = self.run_stage(stage, &ctx, &recommendations, rng).await else {
                continue;
            };
            debug!(user_id, ?stage, added = contribution.items.len(), "Stage contributed");

            recommendations.extend(contribution.items);
            match contribution.labeling {
                Labeling::Set(label) => strategy = Some(label),
                Labeling::IfUnset(label) => {
                    strategy.get_or_insert(label);
                }
                Labeling::Keep => {}
            }
        }

        let mut recommendations = dedup_preserving_order(recommendations);
        recommendations.truncate(TARGET_COUNT);
        let strategy = strategy.unwrap_or(Strategy::None);

        info!(
            user_id,
            seen = ctx.history.seen.len(),
            catalog = ctx.catalog.len(),
            strategy = %strategy,
            count = recommendations.len(),
            "Generated recommendations"
        );

        Ok(RecommendationResult {
            metadata: RecommendationMetadata {
                user_seen_count: ctx.history.seen.len(),
                catalog_size: ctx.catalog.len(),
                strategy_used: strategy,
                recommendation_count: recommendations.len(),
            },
            recommendations,
        })
    }

    /// Returns `None` when the stage's trigger condition is not met.
    async fn run_stage<R: Rng + Send>(
        &self,
        stage: Stage,
        ctx: &RequestContext<'_>,
        so_far: &[String],
        rng: &mut R,
    ) -> Option<Contribution> {
        match stage {
            Stage::Model => Some(self.model_stage(ctx).await),
            Stage::Exploration => exploration_stage(ctx, so_far, rng),
            Stage::PopularityBackfill => popularity_stage(ctx, so_far),
            Stage::Favorites => favorites_stage(ctx, so_far),
            Stage::RandomFallback => random_stage(ctx, so_far, rng),
        }
    }

    async fn model_stage(&self, ctx: &RequestContext<'_>) -> Contribution {
        if ctx.snapshot.membership.has_user(ctx.user_id) {
            let candidates = ctx
                .snapshot
                .membership
                .product_ids
                .iter()
                .filter(|id| !ctx.history.seen.contains(*id) && ctx.catalog.contains(id));
            Contribution {
                items: rank_by_prediction(ctx.snapshot.predictor.as_ref(), ctx.user_id, candidates, ML_SLOTS),
                labeling: Labeling::Set(Strategy::Ml),
            }
        } else {
            Contribution {
                items: self
                    .peers
                    .recommend(ctx.user_id, &ctx.history.seen, COLLABORATIVE_SLOTS)
                    .await,
                labeling: Labeling::Set(Strategy::Collaborative),
            }
        }
    }
}

/// Scores every candidate, skipping pairs the predictor cannot score, and
/// keeps the `limit` best. Equal scores keep candidate order.
pub fn rank_by_prediction<'a>(
    predictor: &dyn RatingPredictor,
    user_id: &str,
    candidates: impl Iterator<Item = &'a String>,
    limit: usize,
) -> Vec<String> {
    let mut scored: Vec<(&String, f32)> = Vec::new();
    let mut skipped = 0usize;
    for product_id in candidates {
        match predictor.predict(user_id, product_id) {
            Ok(score) => scored.push((product_id, score)),
            Err(e) => {
                skipped += 1;
                debug!(user_id, product_id = %product_id, "Skipping candidate: {}", e);
            }
        }
    }
    if skipped > 0 {
        debug!(user_id, skipped, scored = scored.len(), "Some predictions failed");
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored
        .into_iter()
        .take(limit)
        .map(|(id, _)| id.clone())
        .collect()
}

fn exploration_stage<R: Rng>(ctx: &RequestContext<'_>, so_far: &[String], rng: &mut R) -> Option<Contribution> {
    let fresh: Vec<String> = ctx
        .catalog
        .ids()
        .iter()
        .filter(|id| !ctx.snapshot.membership.has_product(id) && !ctx.history.seen.contains(*id))
        .cloned()
        .collect();

    if fresh.is_empty() || so_far.len() >= TARGET_COUNT {
        return None;
    }

    let slots = EXPLORATION_SLOTS.min(TARGET_COUNT - so_far.len());
    Some(Contribution {
        items: shuffle_take(fresh, slots, rng),
        labeling: Labeling::Keep,
    })
}

fn popularity_stage(ctx: &RequestContext<'_>, so_far: &[String]) -> Option<Contribution> {
    if so_far.len() >= BACKFILL_TRIGGER {
        return None;
    }

    let needed = TARGET_COUNT - so_far.len();
    let exclude: HashSet<String> = so_far
        .iter()
        .cloned()
        .chain(ctx.history.seen.iter().cloned())
        .collect();
    Some(Contribution {
        items: ctx.snapshot.popular.top_excluding(&exclude, needed),
        labeling: Labeling::IfUnset(Strategy::Popular),
    })
}

/// Re-surfaces what the user engaged with most. The only stage allowed to
/// return products the user has already seen.
fn favorites_stage(ctx: &RequestContext<'_>, so_far: &[String]) -> Option<Contribution> {
    if !so_far.is_empty() || ctx.history.engagement.is_empty() {
        return None;
    }

    Some(Contribution {
        items: ctx.history.engagement.top(TARGET_COUNT),
        labeling: Labeling::Set(Strategy::Favorites),
    })
}

fn random_stage<R: Rng>(ctx: &RequestContext<'_>, so_far: &[String], rng: &mut R) -> Option<Contribution> {
    if !so_far.is_empty() {
        return None;
    }

    let unseen: Vec<String> = ctx
        .catalog
        .ids()
        .iter()
        .filter(|id| !ctx.history.seen.contains(*id))
        .cloned()
        .collect();
    Some(Contribution {
        items: shuffle_take(unseen, TARGET_COUNT, rng),
        labeling: Labeling::Set(Strategy::Random),
    })
}
