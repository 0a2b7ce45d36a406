pub mod dataset;
pub mod initializer;

use anyhow::{anyhow, Result};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use dataset::{RatingDataset, RatingTriple};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictionError {
    #[error("user {0} is not part of the trained model")]
    UnknownUser(String),
    #[error("product {0} is not part of the trained model")]
    UnknownProduct(String),
    #[error("prediction for ({user}, {product}) is not a finite number")]
    NonFinite { user: String, product: String },
}

/// Estimates how much a user will like a product. Higher is stronger preference.
pub trait RatingPredictor: Send + Sync {
    fn predict(&self, user_id: &str, product_id: &str) -> Result<f32, PredictionError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixFactorizationParams {
    pub n_factors: usize,
    pub n_epochs: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    pub init_std_dev: f32,
    pub rating_scale: (f32, f32),
}

impl Default for MatrixFactorizationParams {
    fn default() -> Self {
        Self {
            n_factors: 100,
            n_epochs: 20,
            learning_rate: 0.005,
            regularization: 0.02,
            init_std_dev: 0.1,
            rating_scale: (1.0, 5.0),
        }
    }
}

/// Biased matrix factorization fitted with stochastic gradient descent.
///
/// The estimate for `(u, i)` is `mu + b_u + b_i + q_i . p_u`, clipped to the
/// rating scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixFactorization {
    pub params: MatrixFactorizationParams,
    pub global_mean: f32,
    pub user_bias: HashMap<String, f32>,
    pub item_bias: HashMap<String, f32>,
    pub user_factors: HashMap<String, DVector<f32>>,
    pub item_factors: HashMap<String, DVector<f32>>,
}

impl MatrixFactorization {
    pub fn new(params: MatrixFactorizationParams) -> Self {
        Self {
            params,
            global_mean: 0.0,
            user_bias: HashMap::new(),
            item_bias: HashMap::new(),
            user_factors: HashMap::new(),
            item_factors: HashMap::new(),
        }
    }

    /// Fits on `ratings`, visiting them in the given order every epoch.
    pub fn fit(params: MatrixFactorizationParams, ratings: &[RatingTriple], seed: u64) -> Result<Self> {
        if ratings.is_empty() {
            return Err(anyhow!("cannot fit a model on an empty rating set"));
        }
        if params.n_factors == 0 {
            return Err(anyhow!("n_factors must be greater than 0"));
        }

        let mut model = Self::new(params);
        let mut rng = StdRng::seed_from_u64(seed);
        model.global_mean =
            ratings.iter().map(|r| r.rating).sum::<f32>() / ratings.len() as f32;

        for rating in ratings {
            model.initialize_user(&rating.user_id, &mut rng);
            model.initialize_item(&rating.product_id, &mut rng);
        }

        for _ in 0..model.params.n_epochs {
            for rating in ratings {
                model.sgd_update(rating);
            }
        }

        Ok(model)
    }

    fn initialize_user(&mut self, user_id: &str, rng: &mut StdRng) {
        if !self.user_factors.contains_key(user_id) {
            let factors =
                initializer::gaussian(self.params.n_factors, 0.0, self.params.init_std_dev, rng);
            self.user_factors.insert(user_id.to_string(), DVector::from_vec(factors));
            self.user_bias.insert(user_id.to_string(), 0.0);
        }
    }

    fn initialize_item(&mut self, product_id: &str, rng: &mut StdRng) {
        if !self.item_factors.contains_key(product_id) {
            let factors =
                initializer::gaussian(self.params.n_factors, 0.0, self.params.init_std_dev, rng);
            self.item_factors.insert(product_id.to_string(), DVector::from_vec(factors));
            self.item_bias.insert(product_id.to_string(), 0.0);
        }
    }

    fn sgd_update(&mut self, rating: &RatingTriple) {
        let lr = self.params.learning_rate;
        let reg = self.params.regularization;

        let (Some(user_emb), Some(item_emb)) = (
            self.user_factors.get(&rating.user_id).cloned(),
            self.item_factors.get(&rating.product_id).cloned(),
        ) else {
            return;
        };
        let bu = self.user_bias.get(&rating.user_id).copied().unwrap_or_default();
        let bi = self.item_bias.get(&rating.product_id).copied().unwrap_or_default();

        let estimate = self.global_mean + bu + bi + item_emb.dot(&user_emb);
        let error = rating.rating - estimate;

        self.user_bias
            .insert(rating.user_id.clone(), bu + lr * (error - reg * bu));
        self.item_bias
            .insert(rating.product_id.clone(), bi + lr * (error - reg * bi));

        let user_gradient = &item_emb * error - &user_emb * reg;
        let item_gradient = &user_emb * error - &item_emb * reg;

        self.user_factors
            .insert(rating.user_id.clone(), &user_emb + user_gradient * lr);
        self.item_factors
            .insert(rating.product_id.clone(), &item_emb + item_gradient * lr);
    }

    /// Unclipped estimate; `None` when either side is unknown.
    pub fn raw_estimate(&self, user_id: &str, product_id: &str) -> Option<f32> {
        let user_emb = self.user_factors.get(user_id)?;
        let item_emb = self.item_factors.get(product_id)?;
        let bu = self.user_bias.get(user_id).copied().unwrap_or_default();
        let bi = self.item_bias.get(product_id).copied().unwrap_or_default();
        Some(self.global_mean + bu + bi + item_emb.dot(user_emb))
    }

    pub fn compute_loss(&self, ratings: &[RatingTriple]) -> f64 {
        let mut total_loss = 0.0f64;
        let mut count = 0;

        for rating in ratings {
            if let Some(estimate) = self.raw_estimate(&rating.user_id, &rating.product_id) {
                let error = (rating.rating - estimate) as f64;
                total_loss += error * error;
                count += 1;
            }
        }

        if count > 0 {
            total_loss / count as f64
        } else {
            0.0
        }
    }

    pub fn user_count(&self) -> usize {
        self.user_factors.len()
    }

    pub fn item_count(&self) -> usize {
        self.item_factors.len()
    }
}

impl RatingPredictor for MatrixFactorization {
    fn predict(&self, user_id: &str, product_id: &str) -> Result<f32, PredictionError> {
        if !self.user_factors.contains_key(user_id) {
            return Err(PredictionError::UnknownUser(user_id.to_string()));
        }
        let estimate = self
            .raw_estimate(user_id, product_id)
            .ok_or_else(|| PredictionError::UnknownProduct(product_id.to_string()))?;

        if !estimate.is_finite() {
            return Err(PredictionError::NonFinite {
                user: user_id.to_string(),
                product: product_id.to_string(),
            });
        }

        let (low, high) = self.params.rating_scale;
        Ok(estimate.clamp(low, high))
    }
}
