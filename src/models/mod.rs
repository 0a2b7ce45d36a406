use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// What a user did to a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    View,
    AddToCart,
    Purchase,
    Rating,
    Search,
    Other,
}

impl From<String> for Action {
    fn from(raw: String) -> Self {
        Action::parse(&raw)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "view" => Action::View,
            "add_to_cart" => Action::AddToCart,
            "purchase" => Action::Purchase,
            "rating" => Action::Rating,
            "search" => Action::Search,
            _ => Action::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::AddToCart => "add_to_cart",
            Action::Purchase => "purchase",
            Action::Rating => "rating",
            Action::Search => "search",
            Action::Other => "other",
        }
    }

    /// Weight contributed to a user's engagement score.
    pub fn engagement_weight(&self) -> u32 {
        match self {
            Action::Purchase => 10,
            Action::AddToCart => 5,
            Action::Rating => 4,
            Action::View => 1,
            Action::Search | Action::Other => 1,
        }
    }

    /// Purchases and cart additions are the basis for peer similarity.
    pub fn is_strong_signal(&self) -> bool {
        matches!(self, Action::Purchase | Action::AddToCart)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub product_id: String,
    pub action: Action,
    pub value: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(user_id: impl Into<String>, product_id: impl Into<String>, action: Action) -> Self {
        Self {
            user_id: user_id.into(),
            product_id: product_id.into(),
            action,
            value: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Accumulated engagement weight per product, iterated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementScore {
    order: Vec<String>,
    scores: HashMap<String, u32>,
}

impl EngagementScore {
    pub fn add(&mut self, product_id: &str, weight: u32) {
        match self.scores.get_mut(product_id) {
            Some(score) => *score += weight,
            None => {
                self.order.push(product_id.to_string());
                self.scores.insert(product_id.to_string(), weight);
            }
        }
    }

    pub fn get(&self, product_id: &str) -> Option<u32> {
        self.scores.get(product_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.order
            .iter()
            .map(move |id| (id.as_str(), self.scores.get(id).copied().unwrap_or_default()))
    }

    /// Highest scores first; equal scores keep first-seen order.
    pub fn top(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<(&str, u32)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.to_string())
            .collect()
    }
}

/// A user's history reduced to what the recommender needs.
#[derive(Debug, Clone, Default)]
pub struct UserHistory {
    pub seen: HashSet<String>,
    pub engagement: EngagementScore,
}

impl UserHistory {
    pub fn from_events(events: &[Event]) -> Self {
        let mut history = Self::default();
        for event in events {
            history.seen.insert(event.product_id.clone());
            history
                .engagement
                .add(&event.product_id, event.action.engagement_weight());
        }
        history
    }
}

/// Current catalog, keeping store order alongside a lookup set.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    ids: Vec<String>,
    index: HashSet<String>,
}

impl Catalog {
    pub fn new(ids: Vec<String>) -> Self {
        let mut index = HashSet::with_capacity(ids.len());
        let ids = ids
            .into_iter()
            .filter(|id| index.insert(id.clone()))
            .collect();
        Self { ids, index }
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.index.contains(product_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub n_factors: usize,
    pub n_epochs: usize,
    pub rmse: f64,
    pub mae: f64,
}

/// Which users and products the live model was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMembership {
    pub product_ids: Vec<String>,
    pub user_ids: Vec<String>,
    pub total_events: u64,
    pub unique_pairs: u64,
    pub trained_at: DateTime<Utc>,
    pub model_params: ModelPerformance,
    #[serde(skip)]
    product_index: HashSet<String>,
    #[serde(skip)]
    user_index: HashSet<String>,
}

impl TrainingMembership {
    pub fn new(
        product_ids: Vec<String>,
        user_ids: Vec<String>,
        total_events: u64,
        unique_pairs: u64,
        trained_at: DateTime<Utc>,
        model_params: ModelPerformance,
    ) -> Self {
        let mut membership = Self {
            product_ids,
            user_ids,
            total_events,
            unique_pairs,
            trained_at,
            model_params,
            product_index: HashSet::new(),
            user_index: HashSet::new(),
        };
        membership.reindex();
        membership
    }

    /// Rebuilds lookup sets; required after deserializing.
    pub fn reindex(&mut self) {
        self.product_index = self.product_ids.iter().cloned().collect();
        self.user_index = self.user_ids.iter().cloned().collect();
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.user_index.contains(user_id)
    }

    pub fn has_product(&self, product_id: &str) -> bool {
        self.product_index.contains(product_id)
    }
}

/// Globally popular products, most popular first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PopularityList(Vec<String>);

impl PopularityList {
    pub fn new(product_ids: Vec<String>) -> Self {
        Self(product_ids)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Popular products not in `exclude`, in popularity order, at most `limit`.
    pub fn top_excluding(&self, exclude: &HashSet<String>, limit: usize) -> Vec<String> {
        self.0
            .iter()
            .filter(|id| !exclude.contains(*id))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Which strategy produced (or was attempted for) a recommendation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    None,
    Ml,
    Collaborative,
    Popular,
    Favorites,
    Random,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::None => "none",
            Strategy::Ml => "ml",
            Strategy::Collaborative => "collaborative",
            Strategy::Popular => "popular",
            Strategy::Favorites => "favorites",
            Strategy::Random => "random",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationMetadata {
    pub user_seen_count: usize,
    pub catalog_size: usize,
    pub strategy_used: Strategy,
    pub recommendation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub recommendations: Vec<String>,
    pub metadata: RecommendationMetadata,
}

impl RecommendationResult {
    pub fn strategy(&self) -> Strategy {
        self.metadata.strategy_used
    }
}
