//! Queue storage
//!
//! The `QueueStore` trait is the only shared mutable state in the service.
//! Two backends are provided: an in-memory store for local runs and tests,
//! and a Redis store for deployments.

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::InMemoryQueueStore;
pub use self::redis::RedisQueueStore;
pub use traits::{QueueStore, StoreError, StoreResult};

use crate::config::{StoreBackend, StoreSettings};
use std::sync::Arc;

/// Build the configured store backend
pub async fn build_store(settings: &StoreSettings) -> StoreResult<Arc<dyn QueueStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryQueueStore::new())),
        StoreBackend::Redis => {
            let store = RedisQueueStore::connect(&settings.redis_url, &settings.key_prefix).await?;
            Ok(Arc::new(store))
        }
    }
}
