use crate::config::Config;
use anyhow::{anyhow, Result};

const MAX_ID_LENGTH: usize = 128;

/// Identifiers arrive from tokens and the store as opaque strings
/// (ObjectId hex, UUIDs, slugs). Reject anything that could not be one.
pub fn validate_identifier(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", kind));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(anyhow!("{} too long (max {} characters)", kind, MAX_ID_LENGTH));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(anyhow!("{} contains invalid characters", kind));
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.auth.jwt_secret.is_empty() {
        return Err(anyhow!("auth.jwt_secret must be set"));
    }

    if config.auth.identity_claim.is_empty() {
        return Err(anyhow!("auth.identity_claim must be set"));
    }

    if config.retrain.timeout_secs == 0 {
        return Err(anyhow!("retrain.timeout_secs must be greater than 0"));
    }

    let training = &config.training;
    if training.n_factors == 0 || training.n_epochs == 0 {
        return Err(anyhow!("training.n_factors and training.n_epochs must be greater than 0"));
    }

    if !(training.learning_rate > 0.0 && training.learning_rate.is_finite()) {
        return Err(anyhow!("training.learning_rate must be a positive number"));
    }

    if training.cv_folds < 2 {
        return Err(anyhow!("training.cv_folds must be at least 2"));
    }

    if training.popular_count == 0 {
        return Err(anyhow!("training.popular_count must be greater than 0"));
    }

    Ok(())
}
