//! In-memory cluster shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{DynamicObject, WatchEvent};
use kubewire::cache::config::WatcherConfig;
use kubewire::cache::event::Outbound;
use kubewire::cache::key::ResourceKey;
use kubewire::cache::outbox::Outbox;
use kubewire::cache::source::{Listing, ResourceSource, ScopedResourceApi, WatchStream};
use kubewire::error::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const WAIT: Duration = Duration::from_secs(5);

type Sender = UnboundedSender<Result<WatchEvent<DynamicObject>>>;

#[derive(Default)]
struct State {
    objects: HashMap<ResourceKey, BTreeMap<String, DynamicObject>>,
    watches: HashMap<ResourceKey, Vec<Sender>>,
    lists: HashMap<ResourceKey, usize>,
    gets: HashMap<ResourceKey, usize>,
    failing: HashSet<ResourceKey>,
    failing_watches: HashSet<ResourceKey>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn notify(&mut self, key: &ResourceKey, event: &WatchEvent<DynamicObject>) {
        if let Some(watches) = self.watches.get_mut(key) {
            watches.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        }
    }
}

/// Fake `ResourceSource` serving a fixed set of contexts from memory
pub struct FakeCluster {
    contexts: HashSet<String>,
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new(contexts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            contexts: contexts.iter().map(ToString::to_string).collect(),
            state: Arc::new(Mutex::new(State::default())),
        })
    }

    fn object(key: &ResourceKey, name: &str, version: String) -> DynamicObject {
        let mut object = DynamicObject::new(name, &key.kind().api_resource());
        if let Some(namespace) = key.namespace() {
            object = object.within(namespace);
        }
        object.metadata.resource_version = Some(version);
        object.metadata.uid = Some(format!("uid-{name}"));
        object
    }

    /// Store an object without telling open watches
    pub fn seed(&self, key: &ResourceKey, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let object = Self::object(key, name, version);
        state
            .objects
            .entry(key.clone())
            .or_default()
            .insert(name.to_string(), object);
    }

    /// Store an object of a specific namespace without telling open watches,
    /// for keys that span every namespace
    pub fn seed_in(&self, key: &ResourceKey, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let mut object = Self::object(key, name, version).within(namespace);
        object.metadata.uid = Some(format!("uid-{namespace}-{name}"));
        state
            .objects
            .entry(key.clone())
            .or_default()
            .insert(format!("{namespace}/{name}"), object);
    }

    /// Remove an object without telling open watches
    pub fn unseed(&self, key: &ResourceKey, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(objects) = state.objects.get_mut(key) {
            objects.remove(name);
        }
    }

    pub fn create(&self, key: &ResourceKey, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let object = Self::object(key, name, version);
        state
            .objects
            .entry(key.clone())
            .or_default()
            .insert(name.to_string(), object.clone());
        state.notify(key, &WatchEvent::Added(object));
    }

    pub fn modify(&self, key: &ResourceKey, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let object = Self::object(key, name, version);
        state
            .objects
            .entry(key.clone())
            .or_default()
            .insert(name.to_string(), object.clone());
        state.notify(key, &WatchEvent::Modified(object));
    }

    pub fn delete(&self, key: &ResourceKey, name: &str) {
        let mut state = self.state.lock().unwrap();
        let removed = state.objects.get_mut(key).and_then(|objects| objects.remove(name));
        if let Some(object) = removed {
            state.notify(key, &WatchEvent::Deleted(object));
        }
    }

    /// Send the stored version of `name` again as `Added`
    pub fn redeliver(&self, key: &ResourceKey, name: &str) {
        let mut state = self.state.lock().unwrap();
        let object = state.objects.get(key).and_then(|objects| objects.get(name)).cloned();
        if let Some(object) = object {
            state.notify(key, &WatchEvent::Added(object));
        }
    }

    /// Fail every open watch stream of `key`
    pub fn break_watches(&self, key: &ResourceKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(watches) = state.watches.remove(key) {
            for tx in watches {
                let _ = tx.send(Err(Error::TransientWatch("connection reset".to_string())));
            }
        }
    }

    pub fn fail_listings(&self, key: &ResourceKey, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(key.clone());
        } else {
            state.failing.remove(key);
        }
    }

    /// Make every watch of `key` fail right after it opens
    pub fn fail_watches(&self, key: &ResourceKey, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_watches.insert(key.clone());
        } else {
            state.failing_watches.remove(key);
        }
    }

    pub fn list_count(&self, key: &ResourceKey) -> usize {
        self.state.lock().unwrap().lists.get(key).copied().unwrap_or(0)
    }

    pub fn get_count(&self, key: &ResourceKey) -> usize {
        self.state.lock().unwrap().gets.get(key).copied().unwrap_or(0)
    }

    /// Watch streams of `key` whose consumer is still alive
    pub fn open_watches(&self, key: &ResourceKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .watches
            .get(key)
            .map_or(0, |watches| watches.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub async fn wait_for_watch(&self, key: &ResourceKey) {
        self.wait_until(|| self.open_watches(key) > 0, "watch to open").await;
    }

    pub async fn wait_for_no_watch(&self, key: &ResourceKey) {
        self.wait_until(|| self.open_watches(key) == 0, "watch to close").await;
    }

    async fn wait_until(&self, condition: impl Fn() -> bool, what: &str) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }
}

struct FakeApi {
    key: ResourceKey,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl ScopedResourceApi for FakeApi {
    async fn list(&self) -> Result<Listing> {
        let mut state = self.state.lock().unwrap();
        *state.lists.entry(self.key.clone()).or_default() += 1;
        if state.failing.contains(&self.key) {
            return Err(Error::Custom("cluster unreachable".to_string()));
        }
        Ok(Listing {
            items: state
                .objects
                .get(&self.key)
                .map(|objects| objects.values().cloned().collect())
                .unwrap_or_default(),
            resource_version: Some(state.version.to_string()),
        })
    }

    async fn watch(&self, _resource_version: &str, _timeout_secs: u32) -> Result<WatchStream> {
        let mut state = self.state.lock().unwrap();
        if state.failing_watches.contains(&self.key) {
            let error = Error::TransientWatch("connection refused".to_string());
            return Ok(futures::stream::once(async move { Err(error) }).boxed());
        }
        let (tx, rx) = unbounded_channel();
        state.watches.entry(self.key.clone()).or_default().push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        let mut state = self.state.lock().unwrap();
        *state.gets.entry(self.key.clone()).or_default() += 1;
        Ok(state.objects.get(&self.key).and_then(|objects| objects.get(name)).cloned())
    }
}

#[async_trait]
impl ResourceSource for FakeCluster {
    async fn bind(&self, key: &ResourceKey) -> Result<Arc<dyn ScopedResourceApi>> {
        if !self.contexts.contains(key.context()) {
            return Err(Error::ContextNotFound(key.context().to_string()));
        }
        Ok(Arc::new(FakeApi {
            key: key.clone(),
            state: self.state.clone(),
        }))
    }
}

/// Short timings so resyncs and polls happen within a test
pub fn fast_config() -> WatcherConfig {
    WatcherConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        watch_timeout_secs: 5,
        poll_interval: Duration::from_millis(50),
    }
}

/// Next message of `outbox`, failing the test after `WAIT`
pub async fn next_message(outbox: &Outbox) -> Outbound {
    tokio::time::timeout(WAIT, outbox.pop())
        .await
        .expect("timed out waiting for a message")
}

/// (event type, object name) of the next message, which must be an event
pub async fn next_event(outbox: &Outbox) -> (String, String) {
    match next_message(outbox).await {
        Outbound::Event(event) => (
            format!("{:?}", event.event_type),
            event.object.metadata.name.unwrap_or_default(),
        ),
        Outbound::Diagnostic(diagnostic) => panic!("unexpected diagnostic: {}", diagnostic.message),
    }
}

/// Assert nothing else arrives within a short grace period
pub async fn assert_quiet(outbox: &Outbox) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(outbox.is_empty(), "unexpected message: {:?}", outbox.try_pop());
}
