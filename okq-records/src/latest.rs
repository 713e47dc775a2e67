//! Latest-value cache adapter.
//!
//! Keeps one [`LatestEntry`] per entity in a [`KeyValueCache`], serialized
//! as JSON:
//!
//! ```text
//! okq:{entity_id}:latest  ->  {"ts": "2024-01-01T00:05:00Z", "fields": {"a": 3.0}}
//! ```
//!
//! The cache is an accelerator, not a source of truth. Writes go to the
//! *contextualized* key. [`LatestCache::get_latest`] reads the *raw* key and
//! [`LatestCache::get_latest_contextualized`] reads the contextualized one;
//! with no key prefix configured the two are the same key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::KeyValueCache;
use crate::context::KeyContext;
use crate::error::{CacheError, ConfigError};
use crate::model::{Fields, Reading};
use crate::timestamp;

/// Default cache key template.
pub const DEFAULT_CACHE_KEY: &str = "okq:{entity_id}:latest";

/// Placeholder replaced by the entity id in a cache key template.
pub const ENTITY_PLACEHOLDER: &str = "{entity_id}";

/// The most recently ingested reading of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestEntry {
    /// Reading timestamp, serialized in canonical form.
    #[serde(with = "timestamp::canonical")]
    pub ts: DateTime<Utc>,
    /// Field values of the reading.
    pub fields: Fields,
}

impl From<&Reading> for LatestEntry {
    fn from(reading: &Reading) -> Self {
        Self {
            ts: reading.normalized_ts(),
            fields: reading.fields.clone(),
        }
    }
}

/// Reads and writes [`LatestEntry`] values through a string cache.
#[derive(Debug, Clone)]
pub struct LatestCache {
    cache: Arc<dyn KeyValueCache>,
    template: String,
}

impl LatestCache {
    /// Creates an adapter using [`DEFAULT_CACHE_KEY`].
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            cache,
            template: DEFAULT_CACHE_KEY.to_string(),
        }
    }

    /// Creates an adapter with a custom key template.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCacheKey`] if the template lacks the
    /// `{entity_id}` placeholder.
    pub fn with_template(
        cache: Arc<dyn KeyValueCache>,
        template: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let template = template.into();
        if !template.contains(ENTITY_PLACEHOLDER) {
            return Err(ConfigError::InvalidCacheKey { template });
        }
        Ok(Self { cache, template })
    }

    /// Returns the key template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Formats the cache key for `entity_id`, namespaced through `ctx` when
    /// `contextualize` is set.
    pub fn cache_key(&self, ctx: &KeyContext, entity_id: &str, contextualize: bool) -> String {
        let id = if contextualize {
            ctx.apply(entity_id)
        } else {
            entity_id.to_string()
        };
        self.template.replace(ENTITY_PLACEHOLDER, &id)
    }

    /// Stores `reading` as the latest entry of `entity_id` under the
    /// contextualized key.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if serialization or the cache write fails.
    pub fn set_latest(
        &self,
        ctx: &KeyContext,
        entity_id: &str,
        reading: &Reading,
    ) -> Result<(), CacheError> {
        let entry = LatestEntry::from(reading);
        let json = serde_json::to_string(&entry)?;
        self.cache
            .set(&self.cache_key(ctx, entity_id, true), &json)
    }

    /// Looks up the latest entry under the raw, non-contextualized key.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if the cache read fails or the cached value
    /// is not a valid entry.
    pub fn get_latest(&self, entity_id: &str) -> Result<Option<LatestEntry>, CacheError> {
        self.lookup(&self.template.replace(ENTITY_PLACEHOLDER, entity_id))
    }

    /// Looks up the latest entry under the contextualized key.
    ///
    /// # Errors
    ///
    /// Same as [`LatestCache::get_latest`].
    pub fn get_latest_contextualized(
        &self,
        ctx: &KeyContext,
        entity_id: &str,
    ) -> Result<Option<LatestEntry>, CacheError> {
        self.lookup(&self.cache_key(ctx, entity_id, true))
    }

    fn lookup(&self, key: &str) -> Result<Option<LatestEntry>, CacheError> {
        match self.cache.get(key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
