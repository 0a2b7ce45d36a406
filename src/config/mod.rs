use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub auth: AuthConfig,
    pub model: ModelConfig,
    pub retrain: RetrainConfig,
    pub training: TrainingConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub connect_retries: usize,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub identity_claim: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("identity_claim", &self.identity_claim)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub artifact_dir: PathBuf,
    pub snapshot_file: String,
}

impl ModelConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.artifact_dir.join(&self.snapshot_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainConfig {
    pub trainer_bin: PathBuf,
    pub config_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl RetrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Hyper-parameters for the offline trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub n_factors: usize,
    pub n_epochs: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    pub init_std_dev: f32,
    pub cv_folds: usize,
    pub min_pairs_per_user: usize,
    pub popular_count: usize,
    pub recency_window_days: i64,
    pub recency_max_boost: f32,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                workers: num_cpus::get(),
            },
            postgres: PostgresConfig {
                url: "postgresql://localhost:5432/ecommerce".to_string(),
                max_connections: 10,
                acquire_timeout_secs: 5,
                connect_retries: 3,
            },
            auth: AuthConfig {
                jwt_secret: "change-me".to_string(),
                identity_claim: "_id".to_string(),
            },
            model: ModelConfig {
                artifact_dir: PathBuf::from("model"),
                snapshot_file: "model_snapshot.json".to_string(),
            },
            retrain: RetrainConfig {
                trainer_bin: PathBuf::from("shoprec-trainer"),
                config_path: None,
                timeout_secs: 300,
            },
            training: TrainingConfig {
                n_factors: 100,
                n_epochs: 20,
                learning_rate: 0.005,
                regularization: 0.02,
                init_std_dev: 0.1,
                cv_folds: 3,
                min_pairs_per_user: 2,
                popular_count: 20,
                recency_window_days: 30,
                recency_max_boost: 0.3,
                seed: 42,
            },
            cors: CorsConfig {
                allowed_origins: vec![
                    "http://localhost:5173".to_string(),
                    "http://localhost:3000".to_string(),
                ],
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Loads `path` when it exists, otherwise defaults; environment overrides apply either way.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            return Self::from_file(path);
        }

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// `SHOPREC_SECTION__KEY` overrides `section.key`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("SHOPREC")
        .prefix_separator("_")
        .separator("__")
}
