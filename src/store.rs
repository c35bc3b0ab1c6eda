use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::time::Duration;

use crate::error::CacheError;
use crate::traits::CacheEntries;
use crate::traits::CacheStore;

/// In-memory [`CacheStore`] over a [moka](https://crates.io/crates/moka) cache.
#[derive(Debug, Clone)]
pub struct MokaStore {
    cache: Cache<String, Vec<u8>>,
}

impl MokaStore {
    pub fn new(max_capacity: u64, time_to_live: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .name("cached-caller")
                .max_capacity(max_capacity)
                .time_to_live(time_to_live)
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MokaStore {
    fn default() -> Self {
        Self::new(100_000, Duration::from_secs(20 * 60))
    }
}

#[async_trait]
impl CacheStore for MokaStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.cache.insert(key.to_owned(), value).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    // moka's iterator borrows internal segments; hand out a snapshot instead.
    fn entries(&self) -> Option<CacheEntries<'_>> {
        let snapshot = self
            .cache
            .iter()
            .map(|(k, v)| Ok::<_, CacheError>(((*k).clone(), v)))
            .collect::<Vec<_>>();
        Some(Box::new(snapshot.into_iter()))
    }
}
