//! Entity id contextualization.
//!
//! Different data sources may use the same raw id for different stations.
//! A [`KeyContext`] namespaces raw ids with a source prefix through a
//! [`KeyDeriver`] before they are used as storage ids or cache keys.
//! Without a prefix, ids pass through unchanged.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Derives a namespaced id from a prefix and a raw key.
///
/// Implementations must be deterministic: the same inputs always produce
/// the same output.
pub trait KeyDeriver: Send + Sync {
    /// Returns the namespaced id for `raw_key` under `prefix`.
    fn derive(&self, prefix: &str, raw_key: &str) -> String;
}

/// Default deriver: the first 16 bytes of `SHA-256(prefix ":" raw_key)`
/// rendered as a hyphenated, UUID-shaped lowercase hex string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyDeriver;

impl KeyDeriver for Sha256KeyDeriver {
    fn derive(&self, prefix: &str, raw_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hasher.update(b":");
        hasher.update(raw_key.as_bytes());
        let digest = hasher.finalize();

        let mut out = String::with_capacity(36);
        for (i, byte) in digest.iter().take(16).enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                out.push('-');
            }
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// Namespace applied to entity ids.
#[derive(Clone, Default)]
pub struct KeyContext {
    prefix: Option<String>,
    deriver: Option<Arc<dyn KeyDeriver>>,
}

impl KeyContext {
    /// A context that leaves ids unchanged.
    pub fn none() -> Self {
        Self::default()
    }

    /// Namespaces ids under `prefix` with the default [`Sha256KeyDeriver`].
    ///
    /// An empty prefix behaves like [`KeyContext::none`].
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_deriver(prefix, Arc::new(Sha256KeyDeriver))
    }

    /// Namespaces ids under `prefix` with a custom deriver.
    pub fn with_deriver(prefix: impl Into<String>, deriver: Arc<dyn KeyDeriver>) -> Self {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Self::none();
        }
        Self {
            prefix: Some(prefix),
            deriver: Some(deriver),
        }
    }

    /// Returns the configured prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Returns the id under which `entity_id` is stored and cached.
    pub fn apply(&self, entity_id: &str) -> String {
        match (&self.prefix, &self.deriver) {
            (Some(prefix), Some(deriver)) => deriver.derive(prefix, entity_id),
            _ => entity_id.to_string(),
        }
    }
}

impl fmt::Debug for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContext")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
