use super::USER_AGENT;
use super::client;
use crate::cache::key::{ResourceKey, Scope};
use crate::cache::source::{Listing, ResourceSource, ScopedResourceApi, WatchStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, DynamicObject, ListParams, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Clients bound to one context. Never mutated once built.
pub struct ContextConnection {
    name: String,
    client: Client,
    metrics: Client,
}

impl ContextConnection {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client for the core, apps, batch, networking, rbac and storage groups
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Client for `metrics.k8s.io`
    #[must_use]
    pub const fn metrics(&self) -> &Client {
        &self.metrics
    }
}

/// Lazily builds and memoizes one `ContextConnection` per context name.
/// Entries are never evicted: credentials are assumed stable once loaded.
pub struct ConnectionRegistry {
    kubeconfig: Kubeconfig,
    connections: RwLock<HashMap<String, Arc<ContextConnection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(kubeconfig: Kubeconfig) -> Self {
        Self {
            kubeconfig,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Load the credential store from `path`, or from the default kubeconfig
    /// locations when `path` is `None`. A missing file yields an empty catalogue.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let kubeconfig = match path {
            Some(path) if path.exists() => Kubeconfig::read_from(path)?,
            Some(path) => {
                warn!("Kubeconfig {} does not exist, starting without contexts", path.display());
                Kubeconfig::default()
            }
            None => Kubeconfig::read().unwrap_or_else(|e| {
                warn!("No kubeconfig loaded ({}), starting without contexts", e);
                Kubeconfig::default()
            }),
        };
        info!("📄 Loaded {} contexts", kubeconfig.contexts.len());
        Ok(Self::new(kubeconfig))
    }

    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|context| context.name.clone())
            .collect()
    }

    #[must_use]
    pub fn has_context(&self, name: &str) -> bool {
        self.kubeconfig.contexts.iter().any(|c| c.name == name)
    }

    /// Get or create the connection for `name`.
    ///
    /// # Errors
    ///
    /// Returns `ContextNotFound` if `name` is not a configured context, or the
    /// kubeconfig/client error if its credentials cannot be turned into clients.
    pub async fn get_connection(&self, name: &str) -> Result<Arc<ContextConnection>> {
        {
            let connections = self.connections.read().await;
            if let Some(connection) = connections.get(name) {
                return Ok(connection.clone());
            }
        }

        if !self.has_context(name) {
            return Err(Error::ContextNotFound(name.to_string()));
        }

        debug!("🔧 Creating clients for context {}", name);
        let config = Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| {
            error!("❌ Failed to load credentials for context {}: {}", name, e);
            e
        })?;

        let connection = Arc::new(ContextConnection {
            name: name.to_string(),
            client: client::from_config(config.clone(), USER_AGENT)?,
            metrics: client::from_config(config, USER_AGENT)?,
        });

        // Keep whichever connection won a concurrent first call
        let mut connections = self.connections.write().await;
        let connection = connections
            .entry(name.to_string())
            .or_insert(connection)
            .clone();
        drop(connections);

        Ok(connection)
    }
}

#[async_trait]
impl ResourceSource for ConnectionRegistry {
    async fn bind(&self, key: &ResourceKey) -> Result<Arc<dyn ScopedResourceApi>> {
        let connection = self.get_connection(key.context()).await?;
        let client = if key.kind().family().is_metrics() {
            connection.metrics().clone()
        } else {
            connection.client().clone()
        };
        Ok(Arc::new(KubeResourceApi::new(client, key)))
    }
}

/// `ScopedResourceApi` over a dynamic `Api` for one kind and scope
pub struct KubeResourceApi {
    api: Api<DynamicObject>,
}

impl KubeResourceApi {
    #[must_use]
    pub fn new(client: Client, key: &ResourceKey) -> Self {
        let resource = key.kind().api_resource();
        let api = match key.scope() {
            Scope::Namespace(namespace) => Api::namespaced_with(client, namespace, &resource),
            Scope::Cluster => Api::all_with(client, &resource),
        };
        Self { api }
    }
}

#[async_trait]
impl ScopedResourceApi for KubeResourceApi {
    async fn list(&self) -> Result<Listing> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(Listing {
            resource_version: list.metadata.resource_version,
            items: list.items,
        })
    }

    async fn watch(&self, resource_version: &str, timeout_secs: u32) -> Result<WatchStream> {
        let params = WatchParams::default().timeout(timeout_secs);
        let stream = self.api.watch(&params, resource_version).await?;
        Ok(stream.map_err(|e| Error::TransientWatch(e.to_string())).boxed())
    }

    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.api.get_opt(name).await?)
    }
}
