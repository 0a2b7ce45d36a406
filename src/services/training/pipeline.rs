use crate::algorithms::dataset::DatasetOptions;
use crate::algorithms::{MatrixFactorization, MatrixFactorizationParams, RatingDataset};
use crate::config::TrainingConfig;
use crate::models::{Event, ModelPerformance, PopularityList, TrainingMembership};
use crate::services::snapshot::SnapshotBundle;
use crate::utils::metrics::cross_validate;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::info;

impl From<&TrainingConfig> for MatrixFactorizationParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            n_factors: config.n_factors,
            n_epochs: config.n_epochs,
            learning_rate: config.learning_rate,
            regularization: config.regularization,
            init_std_dev: config.init_std_dev,
            ..Default::default()
        }
    }
}

/// Builds a complete snapshot bundle from the raw event log.
pub fn train_snapshot(events: &[Event], config: &TrainingConfig, now: DateTime<Utc>) -> Result<SnapshotBundle> {
    info!("Loaded {} events", events.len());
    let dataset = RatingDataset::build(events, now, &DatasetOptions::from(config))?;
    if dataset.ratings.is_empty() {
        bail!(
            "no user has interacted with at least {} products",
            config.min_pairs_per_user
        );
    }
    info!(
        pairs = dataset.unique_pairs(),
        users = dataset.user_ids.len(),
        products = dataset.product_ids.len(),
        "Aggregated rating dataset"
    );

    let params = MatrixFactorizationParams::from(config);
    let metrics = cross_validate(&params, &dataset.ratings, config.cv_folds, config.seed)?;
    info!("Cross validation: RMSE {:.4}, MAE {:.4}", metrics.rmse, metrics.mae);

    let model = MatrixFactorization::fit(params, &dataset.ratings, config.seed)?;
    let unique_pairs = dataset.unique_pairs();
    let membership = TrainingMembership::new(
        dataset.product_ids,
        dataset.user_ids,
        dataset.total_events,
        unique_pairs,
        now,
        ModelPerformance {
            n_factors: config.n_factors,
            n_epochs: config.n_epochs,
            rmse: metrics.rmse,
            mae: metrics.mae,
        },
    );

    info!(
        products = membership.product_ids.len(),
        users = membership.user_ids.len(),
        popular = dataset.popular.len(),
        "Training complete"
    );

    Ok(SnapshotBundle {
        model,
        membership,
        popular: PopularityList::new(dataset.popular),
    })
}
