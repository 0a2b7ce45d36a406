//! Interaction and catalog stores.
//!
//! Both are owned by the storefront backend; this service only reads them.

pub mod postgres;

use crate::models::Event;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

pub use postgres::{PgCatalogStore, PgInteractionStore};

#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Every event of one user, oldest first.
    async fn find_events(&self, user_id: &str) -> Result<Vec<Event>>;

    /// Purchase/add-to-cart events against any of `product_ids`.
    async fn find_strong_events_for_products(&self, product_ids: &[String]) -> Result<Vec<Event>>;

    /// Purchase/add-to-cart events made by any of `user_ids`.
    async fn find_strong_events_for_users(&self, user_ids: &[String]) -> Result<Vec<Event>>;

    async fn count_all_events(&self) -> Result<u64>;

    /// Full log, oldest first. Used by the trainer.
    async fn all_events(&self) -> Result<Vec<Event>>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_product_ids(&self) -> Result<Vec<String>>;
}

/// Event log held in memory; events are kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryInteractionStore {
    events: RwLock<Vec<Event>>,
}

impl InMemoryInteractionStore {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    pub fn record(&self, event: Event) {
        self.events.write().push(event);
    }

    fn select(&self, predicate: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn find_events(&self, user_id: &str) -> Result<Vec<Event>> {
        Ok(self.select(|event| event.user_id == user_id))
    }

    async fn find_strong_events_for_products(&self, product_ids: &[String]) -> Result<Vec<Event>> {
        Ok(self.select(|event| {
            event.action.is_strong_signal() && product_ids.contains(&event.product_id)
        }))
    }

    async fn find_strong_events_for_users(&self, user_ids: &[String]) -> Result<Vec<Event>> {
        Ok(self.select(|event| {
            event.action.is_strong_signal() && user_ids.contains(&event.user_id)
        }))
    }

    async fn count_all_events(&self) -> Result<u64> {
        Ok(self.events.read().len() as u64)
    }

    async fn all_events(&self) -> Result<Vec<Event>> {
        Ok(self.events.read().clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    product_ids: RwLock<Vec<String>>,
}

impl InMemoryCatalogStore {
    pub fn new<I, S>(product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            product_ids: RwLock::new(product_ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn add_product(&self, product_id: impl Into<String>) {
        self.product_ids.write().push(product_id.into());
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn list_product_ids(&self) -> Result<Vec<String>> {
        Ok(self.product_ids.read().clone())
    }
}
