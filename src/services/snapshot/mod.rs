//! Trained-model snapshots.
//!
//! A [`ModelSnapshot`] bundles the predictor with the membership sets and the
//! popularity list it was trained alongside. Serving code only ever sees a
//! whole snapshot through [`SnapshotHandle`]; retraining replaces the `Arc`
//! in one step.

use crate::algorithms::{MatrixFactorization, RatingPredictor};
use crate::models::{PopularityList, TrainingMembership};
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// On-disk form written by the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBundle {
    pub model: MatrixFactorization,
    pub membership: TrainingMembership,
    pub popular: PopularityList,
}

pub struct ModelSnapshot {
    pub version: Uuid,
    pub predictor: Arc<dyn RatingPredictor>,
    pub membership: TrainingMembership,
    pub popular: PopularityList,
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for ModelSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSnapshot")
            .field("version", &self.version)
            .field("products", &self.membership.product_ids.len())
            .field("users", &self.membership.user_ids.len())
            .field("popular", &self.popular.len())
            .field("trained_at", &self.membership.trained_at)
            .finish()
    }
}

impl ModelSnapshot {
    pub fn new(
        predictor: Arc<dyn RatingPredictor>,
        membership: TrainingMembership,
        popular: PopularityList,
    ) -> Self {
        Self {
            version: Uuid::new_v4(),
            predictor,
            membership,
            popular,
            loaded_at: Utc::now(),
        }
    }

    pub fn from_bundle(bundle: SnapshotBundle) -> Self {
        let SnapshotBundle {
            model,
            mut membership,
            popular,
        } = bundle;
        membership.reindex();
        Self::new(Arc::new(model), membership, popular)
    }
}

/// The one shared reference to the live snapshot. Readers never take a lock.
#[derive(Debug, Default)]
pub struct SnapshotHandle {
    current: ArcSwapOption<ModelSnapshot>,
}

impl SnapshotHandle {
    pub fn new(snapshot: Option<ModelSnapshot>) -> Self {
        Self {
            current: ArcSwapOption::new(snapshot.map(Arc::new)),
        }
    }

    /// Pins the current snapshot for as long as the caller holds it.
    pub fn current(&self) -> Option<Arc<ModelSnapshot>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Installs `snapshot`, returning the one it replaced.
    pub fn swap(&self, snapshot: ModelSnapshot) -> Option<Arc<ModelSnapshot>> {
        let snapshot = Arc::new(snapshot);
        info!(
            version = %snapshot.version,
            products = snapshot.membership.product_ids.len(),
            users = snapshot.membership.user_ids.len(),
            popular = snapshot.popular.len(),
            "Installing model snapshot"
        );
        self.current.swap(Some(snapshot))
    }
}

/// Loads and persists snapshot bundles.
pub trait SnapshotProvider: Send + Sync {
    /// `Ok(None)` when nothing has been trained yet.
    fn load(&self) -> Result<Option<ModelSnapshot>>;

    fn persist(&self, bundle: &SnapshotBundle) -> Result<()>;
}

/// Keeps the bundle as a single JSON file, replaced by rename.
#[derive(Debug, Clone)]
pub struct FileSnapshotProvider {
    path: PathBuf,
}

impl FileSnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_bundle(&self) -> Result<Option<SnapshotBundle>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading snapshot {}", self.path.display()))?;
        let mut bundle: SnapshotBundle = serde_json::from_str(&raw)
            .with_context(|| format!("parsing snapshot {}", self.path.display()))?;
        bundle.membership.reindex();
        Ok(Some(bundle))
    }
}

impl SnapshotProvider for FileSnapshotProvider {
    fn load(&self) -> Result<Option<ModelSnapshot>> {
        Ok(self.read_bundle()?.map(ModelSnapshot::from_bundle))
    }

    fn persist(&self, bundle: &SnapshotBundle) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating artifact directory {}", dir.display()))?;

        let tmp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        {
            let mut file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("creating {}", tmp_path.display()))?;
            serde_json::to_writer(&mut file, bundle)?;
            file.flush()?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing snapshot {}", self.path.display()))?;

        info!("Persisted model snapshot to {}", self.path.display());
        Ok(())
    }
}
