/**
 * Resource watcher
 *
 * One watcher per (context, scope, kind). It owns the live snapshot of that
 * key, runs the list-then-watch loop against the cluster and fans every
 * observed change out to the subscribers currently attached.
 */
use super::config::{Backoff, WatcherConfig};
use super::event::{ChangeEvent, Diagnostic, EventType, Outbound};
use super::key::{ObjectId, ResourceKey};
use super::outbox::Subscriber;
use super::source::ScopedResourceApi;
use crate::error::Error;
use futures::StreamExt;
use kube::api::{DynamicObject, WatchEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Initial listing not completed yet
    Starting,
    Live,
    /// Cancellation requested, the loop is winding down
    Stopping,
    /// Terminal; the instance is never revived
    Stopped,
}

/// Outcome of [`ResourceWatcher::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Added,
    AlreadyAttached,
    /// The watcher is stopping and takes no new subscribers
    Refused,
}

/// Outcome of [`ResourceWatcher::detach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    NotAttached,
    Remaining(usize),
    /// The last subscriber left and the watcher was stopped
    Emptied,
}

type Snapshot = BTreeMap<ObjectId, DynamicObject>;

#[derive(Default)]
struct Inner {
    snapshot: Snapshot,
    subscribers: HashMap<Uuid, Subscriber>,
}

impl Inner {
    fn fan_out(&self, event: &ChangeEvent) {
        for subscriber in self.subscribers.values() {
            subscriber.send(event.clone());
        }
    }

    fn broadcast(&self, message: &Outbound) {
        for subscriber in self.subscribers.values() {
            subscriber.send(message.clone());
        }
    }
}

pub struct ResourceWatcher {
    key: ResourceKey,
    inner: RwLock<Inner>,
    state: watch::Sender<WatcherState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ResourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceWatcher")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ResourceWatcher {
    /// Create the watcher and start its loop on the current runtime
    #[must_use]
    pub fn spawn(
        key: ResourceKey,
        api: Arc<dyn ScopedResourceApi>,
        config: WatcherConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(WatcherState::Starting);
        let watcher = Arc::new(Self {
            key,
            inner: RwLock::new(Inner::default()),
            state,
            cancel: CancellationToken::new(),
        });

        let task = watcher.clone();
        tokio::spawn(async move {
            task.run(api, config).await;
        });

        watcher
    }

    #[must_use]
    pub const fn key(&self) -> &ResourceKey {
        &self.key
    }

    #[must_use]
    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Wait until the loop has fully terminated
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == WatcherState::Stopped).await;
    }

    /// Wait until the initial listing has been applied (or the watcher stopped)
    pub async fn ready(&self) -> WatcherState {
        let mut rx = self.state.subscribe();
        rx.wait_for(|s| *s != WatcherState::Starting)
            .await
            .map_or(WatcherState::Stopped, |s| *s)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. A subscriber joining a live watcher first
    /// receives the current snapshot as `Created` events.
    ///
    /// A watcher that is stopping refuses new subscribers; the caller has to
    /// build a fresh one.
    pub fn attach(&self, subscriber: Subscriber) -> Attach {
        let mut inner = self.write();
        match self.state() {
            WatcherState::Stopping | WatcherState::Stopped => return Attach::Refused,
            WatcherState::Starting | WatcherState::Live => {}
        }
        if inner.subscribers.contains_key(&subscriber.id()) {
            return Attach::AlreadyAttached;
        }
        if self.state() == WatcherState::Live {
            for object in inner.snapshot.values() {
                subscriber.send(ChangeEvent::new(EventType::Created, &self.key, object.clone()));
            }
        }
        inner.subscribers.insert(subscriber.id(), subscriber);
        Attach::Added
    }

    /// Unregister a subscriber. Removing the last one stops the watcher
    /// before the subscriber lock is released, so no attach can land on a
    /// watcher that is about to go away.
    pub fn detach(&self, subscriber_id: Uuid) -> Detach {
        let mut inner = self.write();
        if inner.subscribers.remove(&subscriber_id).is_none() {
            return Detach::NotAttached;
        }
        if inner.subscribers.is_empty() {
            self.stop();
            return Detach::Emptied;
        }
        Detach::Remaining(inner.subscribers.len())
    }

    #[must_use]
    pub fn has_subscriber(&self, subscriber_id: Uuid) -> bool {
        self.read().subscribers.contains_key(&subscriber_id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.read().subscribers.len()
    }

    /// Copy of the snapshot, or `None` while the initial listing is pending
    /// or after the watcher left the live state
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<DynamicObject>> {
        let inner = self.read();
        (self.state() == WatcherState::Live).then(|| inner.snapshot.values().cloned().collect())
    }

    /// Request termination. Idempotent.
    pub fn stop(&self) {
        self.state.send_if_modified(|state| match state {
            WatcherState::Starting | WatcherState::Live => {
                *state = WatcherState::Stopping;
                true
            }
            WatcherState::Stopping | WatcherState::Stopped => false,
        });
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>, api: Arc<dyn ScopedResourceApi>, config: WatcherConfig) {
        info!("🔍 Starting watcher for {}", self.key);
        let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        // a watch that ends sooner than this without events counts as a failure
        let min_watch_lifetime = Duration::from_secs(u64::from(config.watch_timeout_secs) / 2);

        'resync: loop {
            let listing = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break 'resync,
                listing = api.list() => listing,
            };

            let mut version = match listing {
                Ok(listing) => {
                    let count = self.apply_listing(listing.items);
                    debug!("📋 Listed {} objects for {}", count, self.key);
                    listing.resource_version.unwrap_or_else(|| "0".to_string())
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("❌ Listing {} failed: {}, retrying in {}s", self.key, e, delay.as_secs());
                    self.broadcast(&Diagnostic::warning(
                        format!("unable to list {}: {e}", self.key.kind()),
                        Some(&self.key),
                    ));
                    if self.pause(delay).await {
                        continue 'resync;
                    }
                    break 'resync;
                }
            };

            if !self.key.kind().supports_watch() {
                backoff.reset();
                if self.pause(config.poll_interval).await {
                    continue 'resync;
                }
                break 'resync;
            }

            let interruption = 'watch: loop {
                let opened = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break 'resync,
                    opened = api.watch(&version, config.watch_timeout_secs) => opened,
                };
                let mut stream = match opened {
                    Ok(stream) => stream,
                    Err(e) => break 'watch interrupted(e),
                };
                let opened_at = Instant::now();
                let mut delivered = false;

                loop {
                    let next = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break 'resync,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(WatchEvent::Error(status))) => {
                            break 'watch Error::TransientWatch(format!("{status:?}"));
                        }
                        Some(Ok(event)) => {
                            delivered = true;
                            backoff.reset();
                            if let Some(rv) = self.apply_event(event) {
                                version = rv;
                            }
                        }
                        Some(Err(e)) => break 'watch interrupted(e),
                        None if delivered || opened_at.elapsed() >= min_watch_lifetime => {
                            backoff.reset();
                            debug!("Watch on {} ended, reopening at {}", self.key, version);
                            continue 'watch;
                        }
                        None => {
                            let delay = backoff.next_delay();
                            debug!("Watch on {} closed early, reopening in {}ms", self.key, delay.as_millis());
                            if self.pause(delay).await {
                                continue 'watch;
                            }
                            break 'resync;
                        }
                    }
                }
            };

            let delay = backoff.next_delay();
            warn!("🔄 {} on {}, resyncing in {}ms", interruption, self.key, delay.as_millis());
            if !self.pause(delay).await {
                break 'resync;
            }
        }

        self.state.send_replace(WatcherState::Stopped);
        info!("🛑 Watcher for {} stopped", self.key);
    }

    /// Sleep unless cancelled first; returns `false` on cancellation
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn broadcast(&self, diagnostic: &Diagnostic) {
        self.read().broadcast(&Outbound::Diagnostic(diagnostic.clone()));
    }

    /// Replace the snapshot with a fresh listing and emit the differences.
    /// The first listing also moves the watcher from `Starting` to `Live`.
    fn apply_listing(&self, items: Vec<DynamicObject>) -> usize {
        let fresh: Snapshot = items
            .into_iter()
            .filter_map(|object| ObjectId::of(&object).map(|id| (id, object)))
            .collect();
        let count = fresh.len();

        let mut inner = self.write();
        let changes = reconcile(&inner.snapshot, &fresh);
        inner.snapshot = fresh;
        for (event_type, object) in changes {
            inner.fan_out(&ChangeEvent::new(event_type, &self.key, object));
        }
        self.state.send_if_modified(|state| {
            if *state == WatcherState::Starting {
                *state = WatcherState::Live;
                true
            } else {
                false
            }
        });
        drop(inner);

        count
    }

    /// Apply one streamed event; returns the resource version to resume from
    fn apply_event(&self, event: WatchEvent<DynamicObject>) -> Option<String> {
        match event {
            WatchEvent::Added(object) => self.upsert(object, true),
            WatchEvent::Modified(object) => self.upsert(object, false),
            WatchEvent::Deleted(object) => self.remove(object),
            WatchEvent::Bookmark(bookmark) => Some(bookmark.metadata.resource_version),
            WatchEvent::Error(_) => None,
        }
    }

    fn upsert(&self, object: DynamicObject, added: bool) -> Option<String> {
        let version = object.metadata.resource_version.clone();
        let Some(id) = ObjectId::of(&object) else {
            warn!("Ignoring {} event without name or uid", self.key);
            return version;
        };

        let mut inner = self.write();
        let event_type = match inner.snapshot.get(&id) {
            // redelivery of something the listing already reflected
            Some(existing) if added && !changed(existing, &object) => None,
            Some(_) => Some(EventType::Updated),
            None if added => Some(EventType::Created),
            None => Some(EventType::Updated),
        };
        inner.snapshot.insert(id, object.clone());
        if let Some(event_type) = event_type {
            debug!("📝 {:?} {}/{}", event_type, self.key, object.metadata.name.as_deref().unwrap_or_default());
            inner.fan_out(&ChangeEvent::new(event_type, &self.key, object));
        }
        version
    }

    fn remove(&self, object: DynamicObject) -> Option<String> {
        let version = object.metadata.resource_version.clone();
        let id = ObjectId::of(&object)?;

        let mut inner = self.write();
        if inner.snapshot.remove(&id).is_some() {
            debug!("🗑️  Deleted {}/{}", self.key, object.metadata.name.as_deref().unwrap_or_default());
            inner.fan_out(&ChangeEvent::new(EventType::Deleted, &self.key, object));
        } else {
            debug!("Deletion of unknown object on {}", self.key);
        }
        version
    }
}

/// Classify a failure of an open or running watch as transient
fn interrupted(error: Error) -> Error {
    match error {
        Error::TransientWatch(_) => error,
        other => Error::TransientWatch(other.to_string()),
    }
}

/// Whether two versions of the same object differ
fn changed(old: &DynamicObject, new: &DynamicObject) -> bool {
    match (&old.metadata.resource_version, &new.metadata.resource_version) {
        (Some(a), Some(b)) => a != b,
        // metrics objects carry no resource version
        _ => old.data != new.data || old.metadata != new.metadata,
    }
}

/// Events that turn subscribers' view of `old` into `new`
fn reconcile(old: &Snapshot, new: &Snapshot) -> Vec<(EventType, DynamicObject)> {
    let mut changes = Vec::new();
    for (id, object) in new {
        match old.get(id) {
            None => changes.push((EventType::Created, object.clone())),
            Some(previous) if changed(previous, object) => {
                changes.push((EventType::Updated, object.clone()));
            }
            Some(_) => {}
        }
    }
    for (id, object) in old {
        if !new.contains_key(id) {
            changes.push((EventType::Deleted, object.clone()));
        }
    }
    changes
}
