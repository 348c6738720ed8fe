//! Subscription sessions
//!
//! A `Session` is the sequential command state machine of one client: it owns
//! the set of keys the client subscribes to and one `Subscriber` identity
//! whose outbox receives the events of every watcher it is attached to.
//! `transport` drives a session over a WebSocket.

pub mod command;
pub mod transport;

pub use command::{Command, CommandFrame, CommandType};
pub use transport::run_session;

use crate::cache::event::Diagnostic;
use crate::cache::key::ResourceKey;
use crate::cache::outbox::{Outbox, Subscriber};
use crate::cache::registry::WatcherRegistry;
use crate::error::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Session {
    registry: Arc<WatcherRegistry>,
    subscriber: Subscriber,
    subscriptions: HashSet<ResourceKey>,
}

impl Session {
    #[must_use]
    pub fn new(registry: Arc<WatcherRegistry>, queue_capacity: usize) -> Self {
        Self {
            registry,
            subscriber: Subscriber::new(queue_capacity),
            subscriptions: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.subscriber.id()
    }

    /// Queue drained by the outbound flow
    #[must_use]
    pub const fn outbox(&self) -> &Arc<Outbox> {
        self.subscriber.outbox()
    }

    #[must_use]
    pub const fn subscriptions(&self) -> &HashSet<ResourceKey> {
        &self.subscriptions
    }

    #[must_use]
    pub fn is_subscribed(&self, key: &ResourceKey) -> bool {
        self.subscriptions.contains(key)
    }

    /// Parse and apply one raw client frame. Failures are logged and reported
    /// to the client as diagnostics; they never end the session.
    pub async fn handle_command(&mut self, raw: &str) {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(e) => {
                warn!("⚠️ Session {}: ignoring command: {}", self.id(), e);
                self.subscriber.send(Diagnostic::warning(e.to_string(), None));
                return;
            }
        };
        let key = match &command {
            Command::AddSource(key) => Some(key.clone()),
            _ => None,
        };
        if let Err(e) = self.apply(command).await {
            warn!("⚠️ Session {}: subscription failed: {}", self.id(), e);
            self.subscriber.send(Diagnostic::error(e.to_string(), key.as_ref()));
        }
    }

    /// Apply a parsed command to the subscription set.
    ///
    /// # Errors
    ///
    /// Returns the registry error of a failed `AddSource` (e.g. `ContextNotFound`);
    /// the subscription set is left unchanged in that case.
    pub async fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::AddSource(key) => {
                if self.subscriptions.contains(&key) {
                    warn!("Session {} already subscribed to {}", self.id(), key);
                    return Ok(());
                }
                self.registry.acquire(&key, &self.subscriber).await?;
                info!("📡 Session {} subscribed to {}", self.id(), key);
                self.subscriptions.insert(key);
            }
            Command::RemoveSource(key) => {
                if self.subscriptions.remove(&key) {
                    self.registry.release(&key, self.id());
                    info!("Session {} unsubscribed from {}", self.id(), key);
                } else {
                    debug!("Session {} was not subscribed to {}", self.id(), key);
                }
            }
            Command::RemoveAllSources => {
                for key in self.subscriptions.drain() {
                    self.registry.release(&key, self.subscriber.id());
                }
                info!("Session {} unsubscribed from everything", self.id());
            }
        }
        Ok(())
    }

    /// Detach from every watcher. Idempotent; also run on drop.
    pub fn close(&mut self) {
        self.subscriptions.clear();
        self.registry.release_all(self.subscriber.id());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
