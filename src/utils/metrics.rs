use crate::algorithms::{MatrixFactorization, MatrixFactorizationParams, RatingPredictor, RatingTriple};
use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub rmse: f64,
    pub mae: f64,
}

/// Root mean squared error over `(actual, predicted)` pairs.
pub fn rmse(pairs: &[(f32, f32)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total: f64 = pairs
        .iter()
        .map(|(actual, predicted)| ((actual - predicted) as f64).powi(2))
        .sum();
    (total / pairs.len() as f64).sqrt()
}

/// Mean absolute error over `(actual, predicted)` pairs.
pub fn mae(pairs: &[(f32, f32)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total: f64 = pairs
        .iter()
        .map(|(actual, predicted)| ((actual - predicted) as f64).abs())
        .sum();
    total / pairs.len() as f64
}

/// Scores a fitted model on held-out ratings. Pairs the model cannot score
/// fall back to the training mean, the way an untrained predictor would.
pub fn evaluate(model: &MatrixFactorization, test: &[RatingTriple]) -> ErrorMetrics {
    let (low, high) = model.params.rating_scale;
    let fallback = model.global_mean.clamp(low, high);
    let pairs: Vec<(f32, f32)> = test
        .iter()
        .map(|r| {
            let predicted = model
                .predict(&r.user_id, &r.product_id)
                .unwrap_or(fallback);
            (r.rating, predicted)
        })
        .collect();

    ErrorMetrics {
        rmse: rmse(&pairs),
        mae: mae(&pairs),
    }
}

/// K-fold cross validation; folds are fitted in parallel and the mean
/// RMSE/MAE across folds is returned.
pub fn cross_validate(
    params: &MatrixFactorizationParams,
    ratings: &[RatingTriple],
    folds: usize,
    seed: u64,
) -> Result<ErrorMetrics> {
    if folds < 2 {
        return Err(anyhow!("cross validation needs at least 2 folds, got {}", folds));
    }
    if ratings.len() < folds {
        return Err(anyhow!(
            "cross validation needs at least {} ratings, got {}",
            folds,
            ratings.len()
        ));
    }

    let mut indices: Vec<usize> = (0..ratings.len()).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let fold_metrics: Vec<ErrorMetrics> = (0..folds)
        .into_par_iter()
        .map(|fold| -> Result<ErrorMetrics> {
            let (test, train): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .enumerate()
                .map(|(position, &index)| (position % folds == fold, index))
                .fold((Vec::new(), Vec::new()), |(mut test, mut train), (held_out, index)| {
                    if held_out {
                        test.push(index);
                    } else {
                        train.push(index);
                    }
                    (test, train)
                });

            let train: Vec<RatingTriple> = train.into_iter().map(|i| ratings[i].clone()).collect();
            let test: Vec<RatingTriple> = test.into_iter().map(|i| ratings[i].clone()).collect();

            let model = MatrixFactorization::fit(params.clone(), &train, seed.wrapping_add(fold as u64))?;
            Ok(evaluate(&model, &test))
        })
        .collect::<Result<Vec<_>>>()?;

    let n = fold_metrics.len() as f64;
    Ok(ErrorMetrics {
        rmse: fold_metrics.iter().map(|m| m.rmse).sum::<f64>() / n,
        mae: fold_metrics.iter().map(|m| m.mae).sum::<f64>() / n,
    })
}
