//! Caching layer for reverie-runtime.
//!
//! Keeps the most recent AI-generated introduction per user and subject.
//! It serves as the secondary tier when the provider cannot produce a
//! fresh one.

use moka::future::Cache;
use std::time::Duration;

use crate::config::CacheConfig;

/// Cache key for introductions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IntroductionKey {
    user_id: String,
    subject_id: String,
}

impl IntroductionKey {
    pub fn new(user_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            subject_id: subject_id.into(),
        }
    }
}

/// Introduction cache using moka.
#[derive(Clone)]
pub struct IntroductionCache {
    cache: Cache<IntroductionKey, String>,
}

impl IntroductionCache {
    /// Create a new cache with the given capacity and time-to-live.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    pub async fn get(&self, key: &IntroductionKey) -> Option<String> {
        self.cache.get(key).await
    }

    /// Store an introduction, replacing any older one for the same key.
    pub async fn insert(&self, key: IntroductionKey, introduction: String) {
        self.cache.insert(key, introduction).await;
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for IntroductionCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl std::fmt::Debug for IntroductionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntroductionCache")
            .field("entries", &self.entry_count())
            .finish()
    }
}
