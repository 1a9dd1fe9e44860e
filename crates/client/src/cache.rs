//! Cache collaborator for non-transactional reads.
//!
//! Entities are cached under their url-safe key token, serialized through the
//! wire representation. The [`Cache`] wrapper owns the operational limits:
//! backends never see more than [`CACHE_MAX_BATCH_SIZE`] keys per call, and
//! entries above [`CACHE_MAX_ENTRY_BYTES`] are never stored. Transactional
//! reads bypass this module entirely.

use std::collections::HashMap;
use std::sync::Arc;

use nimbus_core::limits::{CACHE_MAX_BATCH_SIZE, CACHE_MAX_ENTRY_BYTES};
use nimbus_core::{Entity, Key, Result};
use parking_lot::RwLock;
use tracing::debug;

use crate::wire::{entity_from_wire, entity_to_wire, WireEntity};

/// Storage backend for cached entity bytes.
///
/// Callers go through [`Cache`], which chunks batches and enforces the entry
/// size cap; implementations only need plain keyed byte storage.
pub trait CacheBackend: Send + Sync {
    /// Fetch the entries present for the given key tokens.
    fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// Store the given entries.
    fn put_multi(&self, entries: &[(String, Vec<u8>)]) -> Result<()>;

    /// Drop the given entries. Missing entries are not an error.
    fn delete_multi(&self, keys: &[String]) -> Result<()>;

    /// Drop everything.
    fn flush(&self) -> Result<()>;
}

/// Batch-limiting, size-capping front over a [`CacheBackend`].
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    project_id: String,
}

impl Cache {
    /// Wrap a backend for the given project.
    pub fn new(backend: Arc<dyn CacheBackend>, project_id: impl Into<String>) -> Self {
        Self {
            backend,
            project_id: project_id.into(),
        }
    }

    fn token(&self, key: &Key) -> String {
        key.to_urlsafe(&self.project_id)
    }

    /// Look up cached entities for the given keys.
    ///
    /// Returns hits keyed by their url-safe token. Undecodable entries are
    /// dropped from the backend and treated as misses.
    pub fn get_multi(&self, keys: &[&Key]) -> Result<HashMap<String, Entity>> {
        let tokens: Vec<String> = keys
            .iter()
            .filter(|k| k.is_complete())
            .map(|k| self.token(k))
            .collect();
        let mut hits = HashMap::new();
        for chunk in tokens.chunks(CACHE_MAX_BATCH_SIZE) {
            for (token, bytes) in self.backend.get_multi(chunk)? {
                match serde_json::from_slice::<WireEntity>(&bytes)
                    .map_err(Into::into)
                    .and_then(|wire| entity_from_wire(&wire))
                {
                    Ok(entity) => {
                        hits.insert(token, entity);
                    }
                    Err(err) => {
                        debug!(%token, %err, "dropping undecodable cache entry");
                        self.backend.delete_multi(&[token])?;
                    }
                }
            }
        }
        Ok(hits)
    }

    /// Store entities after a successful read or write.
    ///
    /// Entities without a complete key are skipped, as are entries whose
    /// serialized form exceeds the size cap.
    pub fn put_multi(&self, entities: &[&Entity]) -> Result<()> {
        let mut entries = Vec::with_capacity(entities.len());
        for entity in entities {
            let key = match entity.key() {
                Some(key) if key.is_complete() => key,
                _ => continue,
            };
            let bytes = serde_json::to_vec(&entity_to_wire(entity, &self.project_id))?;
            if bytes.len() > CACHE_MAX_ENTRY_BYTES {
                debug!(size = bytes.len(), "skipping oversized cache entry");
                continue;
            }
            entries.push((self.token(key), bytes));
        }
        for chunk in entries.chunks(CACHE_MAX_BATCH_SIZE) {
            self.backend.put_multi(chunk)?;
        }
        Ok(())
    }

    /// Invalidate entries for the given keys.
    pub fn delete_multi(&self, keys: &[&Key]) -> Result<()> {
        let tokens: Vec<String> = keys
            .iter()
            .filter(|k| k.is_complete())
            .map(|k| self.token(k))
            .collect();
        for chunk in tokens.chunks(CACHE_MAX_BATCH_SIZE) {
            self.backend.delete_multi(chunk)?;
        }
        Ok(())
    }
}

/// In-process backend guarded by a [`parking_lot::RwLock`].
///
/// Suitable for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheBackend for MemoryCache {
    fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn put_multi(&self, new: &[(String, Vec<u8>)]) -> Result<()> {
        let mut entries = self.entries.write();
        for (key, value) in new {
            entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_multi(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}
