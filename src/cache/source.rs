//! Seam between watchers and the cluster API
//!
//! A `ResourceSource` resolves a key to a `ScopedResourceApi` bound to the
//! right cluster, client and scope. Watchers only ever talk to the cluster
//! through that handle.

use super::key::ResourceKey;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::api::{DynamicObject, WatchEvent};
use std::sync::Arc;

pub type WatchStream = BoxStream<'static, Result<WatchEvent<DynamicObject>>>;

/// Result of a full listing: the objects plus the version to resume a watch from
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub items: Vec<DynamicObject>,
    pub resource_version: Option<String>,
}

/// List/watch/get for one (context, scope, kind)
#[async_trait]
pub trait ScopedResourceApi: Send + Sync {
    /// Full listing of the kind within scope
    async fn list(&self) -> Result<Listing>;

    /// Open a watch positioned after `resource_version`
    async fn watch(&self, resource_version: &str, timeout_secs: u32) -> Result<WatchStream>;

    /// Direct, uncached read of one object
    async fn get(&self, name: &str) -> Result<Option<DynamicObject>>;
}

/// Resolves keys to API handles. Fails with `ContextNotFound` for unknown contexts.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn bind(&self, key: &ResourceKey) -> Result<Arc<dyn ScopedResourceApi>>;
}
