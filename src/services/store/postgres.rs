//! Postgres-backed stores.
//!
//! Expected schema (owned by the storefront backend):
//!
//! ```sql
//! CREATE TABLE events (
//!     user_id    TEXT,
//!     product_id TEXT,
//!     action     TEXT NOT NULL,
//!     value      DOUBLE PRECISION,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! CREATE TABLE products (id TEXT PRIMARY KEY);
//! ```
//!
//! Anonymous events (no user or product) are ignored everywhere, counts
//! included, so the live event count and the trainer's `total_events` cover
//! the same rows.

use super::{CatalogStore, InteractionStore};
use crate::config::PostgresConfig;
use crate::models::{Action, Event};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

const EVENT_COLUMNS: &str = "user_id, product_id, action, value, created_at";
const IDENTIFIED: &str = "user_id IS NOT NULL AND product_id IS NOT NULL";
const STRONG_ACTIONS: &str = "action IN ('purchase', 'add_to_cart')";

fn count_events_sql() -> String {
    format!("SELECT COUNT(*) FROM events WHERE {IDENTIFIED}")
}

fn all_events_sql() -> String {
    format!("SELECT {EVENT_COLUMNS} FROM events WHERE {IDENTIFIED} ORDER BY created_at")
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    user_id: String,
    product_id: String,
    action: String,
    value: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            user_id: row.user_id,
            product_id: row.product_id,
            action: Action::parse(&row.action),
            value: row.value,
            created_at: row.created_at,
        }
    }
}

pub async fn connect(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await?;

    info!("Connected to Postgres (max {} connections)", config.max_connections);
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, ids: Option<&[String]>) -> Result<Vec<Event>> {
        let query = sqlx::query_as::<_, EventRow>(sql);
        let query = match ids {
            Some(ids) => query.bind(ids),
            None => query,
        };
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[async_trait]
impl InteractionStore for PgInteractionStore {
    async fn find_events(&self, user_id: &str) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = $1 AND {IDENTIFIED} ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn find_strong_events_for_products(&self, product_ids: &[String]) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE product_id = ANY($1) AND {STRONG_ACTIONS} AND {IDENTIFIED} ORDER BY created_at"
        );
        self.fetch(&sql, Some(product_ids)).await
    }

    async fn find_strong_events_for_users(&self, user_ids: &[String]) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE user_id = ANY($1) AND {STRONG_ACTIONS} AND {IDENTIFIED} ORDER BY created_at"
        );
        self.fetch(&sql, Some(user_ids)).await
    }

    async fn count_all_events(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&count_events_sql())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn all_events(&self) -> Result<Vec<Event>> {
        self.fetch(&all_events_sql(), None).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn list_product_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}
