//! Bounded outbound queue shared by all subscriptions of one session
//!
//! Watchers push into it without ever waiting: when the queue is full the
//! oldest message is dropped, so a slow client only loses its own backlog and
//! never stalls delivery to other subscribers of the same key.

use super::event::Outbound;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug)]
pub struct Outbox {
    queue: Mutex<VecDeque<Outbound>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl Outbox {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a message, evicting the oldest one if the queue is saturated
    pub fn push(&self, message: impl Into<Outbound>) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(message.into());
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<Outbound> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait for the next message. Cancel-safe: a wake-up consumed by a
    /// cancelled call is kept as a stored permit by `Notify`.
    pub async fn pop(&self) -> Outbound {
        loop {
            if let Some(message) = self.try_pop() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages evicted because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A subscriber as seen by watchers: a stable identity plus its outbox
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: Uuid,
    outbox: Arc<Outbox>,
}

impl Subscriber {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbox: Arc::new(Outbox::new(capacity)),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn send(&self, message: impl Into<Outbound>) {
        self.outbox.push(message);
    }
}
