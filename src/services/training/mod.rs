//! Retraining: runs the offline trainer, then reloads and installs the
//! snapshot it wrote. The live snapshot is only replaced once the new one
//! has been read back successfully.

pub mod pipeline;

use crate::config::Config;
use crate::models::TrainingMembership;
use crate::services::snapshot::{SnapshotHandle, SnapshotProvider};
use crate::utils::round_to;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub use pipeline::train_snapshot;

#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("a retrain is already in progress")]
    AlreadyRunning,
    #[error("trainer did not finish within {0:?}")]
    Timeout(Duration),
    #[error("trainer exited with status {code:?}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("failed to run trainer: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to reload model snapshot: {0}")]
    Reload(String),
}

/// Captured output of a successful trainer run.
#[derive(Debug, Clone, Default)]
pub struct TrainerOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait RetrainExecutor: Send + Sync {
    async fn run(&self) -> Result<TrainerOutput, RetrainError>;
}

/// Runs the trainer binary as a child process; the child is killed if it
/// outlives the timeout.
#[derive(Debug, Clone)]
pub struct ProcessRetrainExecutor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessRetrainExecutor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// The trainer always writes to the path the server reloads from.
    pub fn from_config(config: &Config) -> Self {
        let mut args = Vec::new();
        if let Some(path) = &config.retrain.config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args.push("--output".to_string());
        args.push(config.model.snapshot_path().display().to_string());
        Self::new(config.retrain.trainer_bin.clone(), args, config.retrain.timeout())
    }
}

#[async_trait]
impl RetrainExecutor for ProcessRetrainExecutor {
    async fn run(&self) -> Result<TrainerOutput, RetrainError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(RetrainError::Timeout(self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(RetrainError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }
        Ok(TrainerOutput { stdout, stderr })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub rmse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainSummary {
    pub total_products: usize,
    pub total_users: usize,
    pub trained_at: DateTime<Utc>,
    pub model_performance: PerformanceSummary,
}

impl From<&TrainingMembership> for RetrainSummary {
    fn from(membership: &TrainingMembership) -> Self {
        Self {
            total_products: membership.product_ids.len(),
            total_users: membership.user_ids.len(),
            trained_at: membership.trained_at,
            model_performance: PerformanceSummary {
                rmse: round_to(membership.model_params.rmse, 4),
                mae: round_to(membership.model_params.mae, 4),
            },
        }
    }
}

pub struct TrainingService {
    executor: Arc<dyn RetrainExecutor>,
    provider: Arc<dyn SnapshotProvider>,
    snapshots: Arc<SnapshotHandle>,
    in_flight: Mutex<()>,
}

impl TrainingService {
    pub fn new(
        executor: Arc<dyn RetrainExecutor>,
        provider: Arc<dyn SnapshotProvider>,
        snapshots: Arc<SnapshotHandle>,
    ) -> Self {
        Self {
            executor,
            provider,
            snapshots,
            in_flight: Mutex::new(()),
        }
    }

    /// At most one retrain runs at a time; a second caller is turned away
    /// rather than queued.
    pub async fn retrain(&self) -> Result<RetrainSummary, RetrainError> {
        let _guard = self.in_flight.try_lock().map_err(|_| RetrainError::AlreadyRunning)?;

        info!("Starting model retraining");
        let started = Instant::now();

        let output = self.executor.run().await.map_err(|e| {
            error!("Training failed: {}", e);
            e
        })?;
        debug!(stdout = %output.stdout.trim_end(), "Trainer output");

        let provider = self.provider.clone();
        let loaded = tokio::task::spawn_blocking(move || provider.load())
            .await
            .map_err(|e| RetrainError::Reload(e.to_string()))?
            .map_err(|e| RetrainError::Reload(format!("{:#}", e)))?;
        let snapshot = loaded.ok_or_else(|| RetrainError::Reload("trainer wrote no snapshot".to_string()))?;
        if let Some(live) = self.snapshots.current() {
            if snapshot.membership.trained_at <= live.membership.trained_at {
                return Err(RetrainError::Reload(format!(
                    "snapshot trained at {} is not newer than the live model",
                    snapshot.membership.trained_at
                )));
            }
        }

        let summary = RetrainSummary::from(&snapshot.membership);
        self.snapshots.swap(snapshot);

        info!(
            products = summary.total_products,
            users = summary.total_users,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model retrained and reloaded"
        );
        Ok(summary)
    }
}
