use crate::config::TrainingConfig;
use crate::models::{Action, Event};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rating assumed for a `rating` event that carries no value.
const DEFAULT_EXPLICIT_RATING: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingTriple {
    pub user_id: String,
    pub product_id: String,
    pub rating: f32,
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub min_pairs_per_user: usize,
    pub popular_count: usize,
    pub recency_window_days: i64,
    pub recency_max_boost: f32,
}

impl From<&TrainingConfig> for DatasetOptions {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            min_pairs_per_user: config.min_pairs_per_user,
            popular_count: config.popular_count,
            recency_window_days: config.recency_window_days,
            recency_max_boost: config.recency_max_boost,
        }
    }
}

/// Everything the trainer derives from the raw event log.
#[derive(Debug, Clone)]
pub struct RatingDataset {
    pub ratings: Vec<RatingTriple>,
    pub user_ids: Vec<String>,
    pub product_ids: Vec<String>,
    pub popular: Vec<String>,
    pub total_events: u64,
}

impl RatingDataset {
    pub fn build(events: &[Event], now: DateTime<Utc>, options: &DatasetOptions) -> Result<Self> {
        if events.is_empty() {
            return Err(anyhow!("no event data found"));
        }

        // (user, product) -> (sum, count); BTreeMap keeps pairs sorted
        let mut pairs: BTreeMap<(String, String), (f32, u32)> = BTreeMap::new();
        for event in events {
            let rating = implicit_rating(event) * recency_boost(event.created_at, now, options);
            if !rating.is_finite() {
                continue;
            }
            let entry = pairs
                .entry((event.user_id.clone(), event.product_id.clone()))
                .or_insert((0.0, 0));
            entry.0 += rating;
            entry.1 += 1;
        }

        let mut pairs_per_user: HashMap<&str, usize> = HashMap::new();
        for (user_id, _) in pairs.keys() {
            *pairs_per_user.entry(user_id.as_str()).or_default() += 1;
        }

        let ratings: Vec<RatingTriple> = pairs
            .iter()
            .filter(|((user_id, _), _)| {
                pairs_per_user.get(user_id.as_str()).copied().unwrap_or_default()
                    >= options.min_pairs_per_user
            })
            .map(|((user_id, product_id), (sum, count))| RatingTriple {
                user_id: user_id.clone(),
                product_id: product_id.clone(),
                rating: sum / *count as f32,
            })
            .collect();

        let user_ids = unique_in_order(ratings.iter().map(|r| r.user_id.as_str()));
        let product_ids = unique_in_order(ratings.iter().map(|r| r.product_id.as_str()));

        Ok(Self {
            ratings,
            user_ids,
            product_ids,
            popular: most_popular(events, options.popular_count),
            total_events: events.len() as u64,
        })
    }

    pub fn unique_pairs(&self) -> u64 {
        self.ratings.len() as u64
    }
}

/// Base rating for one event: explicit value for ratings, action weight otherwise.
pub fn implicit_rating(event: &Event) -> f32 {
    match event.action {
        Action::View => 1.0,
        Action::AddToCart => 3.5,
        Action::Purchase => 5.0,
        Action::Rating => event
            .value
            .map(|v| v as f32)
            .unwrap_or(DEFAULT_EXPLICIT_RATING),
        Action::Search | Action::Other => 1.0,
    }
}

/// Up to `recency_max_boost` extra weight for events inside the recency window.
pub fn recency_boost(created_at: DateTime<Utc>, now: DateTime<Utc>, options: &DatasetOptions) -> f32 {
    let window = options.recency_window_days.max(1);
    let days_ago = now.signed_duration_since(created_at).num_days().clamp(0, window);
    1.0 + (window - days_ago) as f32 / window as f32 * options.recency_max_boost
}

/// Products ranked by raw event count; ties keep first-appearance order.
pub fn most_popular(events: &[Event], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, event) in events.iter().enumerate() {
        counts
            .entry(event.product_id.as_str())
            .or_insert((0, position))
            .0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(id, _)| id.to_string())
        .collect()
}

fn unique_in_order<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}
