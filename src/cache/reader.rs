//! Read side of the cache for the CRUD, report and search layers
//!
//! The cache is only populated as a side effect of subscriptions: a lookup
//! never creates a watcher, and callers fall back to a direct API call when
//! it returns `None`.

use super::key::ResourceKey;
use super::registry::WatcherRegistry;
use super::source::ResourceSource;
use crate::error::{Error, Result};
use kube::api::DynamicObject;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CacheReader {
    registry: Arc<WatcherRegistry>,
}

impl CacheReader {
    #[must_use]
    pub const fn new(registry: Arc<WatcherRegistry>) -> Self {
        Self { registry }
    }

    /// Copy of the current snapshot for `key`, or `None` when no live watcher exists
    #[must_use]
    pub fn lookup(&self, key: &ResourceKey) -> Option<Vec<DynamicObject>> {
        let snapshot = self.registry.get(key).and_then(|watcher| watcher.snapshot());
        if snapshot.is_some() {
            debug!("🎯 Cache HIT: {}", key);
        } else {
            debug!("❌ Cache MISS: {}", key);
        }
        snapshot
    }

    /// Cached object by name within the key's namespace, `None` when the key
    /// is not cached. `Some(None)` means the key is cached and the object
    /// does not exist.
    ///
    /// Keys spanning every namespace of a namespaced kind never answer, since
    /// the same name may exist in several namespaces.
    #[must_use]
    pub fn lookup_one(&self, key: &ResourceKey, name: &str) -> Option<Option<DynamicObject>> {
        if key.spans_namespaces() {
            return None;
        }
        self.lookup(key).map(|objects| {
            objects.into_iter().find(|object| {
                object.metadata.name.as_deref() == Some(name)
                    && object.metadata.namespace.as_deref() == key.namespace()
            })
        })
    }
}

/// Cache-aside reads: snapshot first, direct API call otherwise
#[derive(Clone)]
pub struct CachedResources {
    reader: CacheReader,
    source: Arc<dyn ResourceSource>,
}

impl CachedResources {
    #[must_use]
    pub fn new(reader: CacheReader, source: Arc<dyn ResourceSource>) -> Self {
        Self { reader, source }
    }

    /// # Errors
    ///
    /// Returns `ContextNotFound` for unknown contexts, or the API error of the
    /// direct listing on a cache miss.
    pub async fn list(&self, key: &ResourceKey) -> Result<Vec<DynamicObject>> {
        let api = self.source.bind(key).await?;
        if let Some(objects) = self.reader.lookup(key) {
            return Ok(objects);
        }
        Ok(api.list().await?.items)
    }

    /// # Errors
    ///
    /// Returns `ContextNotFound` for unknown contexts, an error when `key`
    /// spans every namespace of a namespaced kind, or the API error of the
    /// direct read on a cache miss.
    pub async fn get(&self, key: &ResourceKey, name: &str) -> Result<Option<DynamicObject>> {
        let api = self.source.bind(key).await?;
        if key.spans_namespaces() {
            return Err(Error::Custom(format!(
                "{} objects are namespaced, a namespace is needed to get {name}",
                key.kind()
            )));
        }
        if let Some(found) = self.reader.lookup_one(key, name) {
            return Ok(found);
        }
        api.get(name).await
    }
}
