/**
 * Watcher registry
 *
 * Maps keys to live watchers. The map lock only covers lookup, insertion and
 * removal. Subscriber sets are guarded by each watcher's own lock, where the
 * last detach also stops the watcher; an attach that loses that race is
 * refused and retried against a fresh watcher.
 */
use super::config::WatcherConfig;
use super::key::ResourceKey;
use super::outbox::Subscriber;
use super::source::ResourceSource;
use super::watcher::{Attach, Detach, ResourceWatcher};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

pub struct WatcherRegistry {
    source: Arc<dyn ResourceSource>,
    config: WatcherConfig,
    watchers: Mutex<HashMap<ResourceKey, Arc<ResourceWatcher>>>,
}

impl WatcherRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn ResourceSource>, config: WatcherConfig) -> Self {
        Self {
            source,
            config,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<ResourceKey, Arc<ResourceWatcher>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `subscriber` to the watcher for `key`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `ContextNotFound` if the key's context is unknown; nothing is
    /// registered in that case.
    pub async fn acquire(
        &self,
        key: &ResourceKey,
        subscriber: &Subscriber,
    ) -> Result<Arc<ResourceWatcher>> {
        // Resolving the connection may hit the network, so it happens before
        // taking the lock; an unused handle is simply dropped.
        let api = self.source.bind(key).await?;

        loop {
            let watcher = self
                .watchers()
                .entry(key.clone())
                .or_insert_with(|| {
                    info!("➕ Creating watcher for {}", key);
                    ResourceWatcher::spawn(key.clone(), api.clone(), self.config.clone())
                })
                .clone();

            // snapshot replay runs here, outside the map lock
            match watcher.attach(subscriber.clone()) {
                Attach::Added => {
                    debug!(
                        "Subscriber {} attached to {} ({} total)",
                        subscriber.id(),
                        key,
                        watcher.subscriber_count()
                    );
                }
                Attach::AlreadyAttached => {}
                Attach::Refused => {
                    debug!("Watcher for {} is stopping, building a new one", key);
                    self.forget(key, &watcher);
                    continue;
                }
            }
            return Ok(watcher);
        }
    }

    /// Detach `subscriber_id` from `key`, tearing the watcher down when it
    /// was the last one. Unknown keys or subscribers are ignored.
    pub fn release(&self, key: &ResourceKey, subscriber_id: Uuid) {
        let mut watchers = self.watchers();
        let Some(watcher) = watchers.get(key) else {
            return;
        };
        if watcher.detach(subscriber_id) == Detach::Emptied {
            info!("➖ Last subscriber left {}, stopping watcher", key);
            watchers.remove(key);
        }
    }

    /// Detach `subscriber_id` from every watcher it is attached to
    pub fn release_all(&self, subscriber_id: Uuid) {
        self.watchers().retain(|key, watcher| {
            if watcher.detach(subscriber_id) == Detach::Emptied {
                info!("➖ Last subscriber left {}, stopping watcher", key);
                return false;
            }
            true
        });
    }

    /// Drop the entry for `key` if it still points at `watcher`
    fn forget(&self, key: &ResourceKey, watcher: &Arc<ResourceWatcher>) {
        let mut watchers = self.watchers();
        if watchers.get(key).is_some_and(|current| Arc::ptr_eq(current, watcher)) {
            watchers.remove(key);
        }
    }

    /// The live watcher for `key`, if any. Never creates one.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<ResourceWatcher>> {
        self.watchers().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.watchers().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every watcher, e.g. on process shutdown
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.watchers().drain().collect();
        for (key, watcher) in drained {
            debug!("Stopping watcher for {} on shutdown", key);
            watcher.stop();
        }
    }
}
