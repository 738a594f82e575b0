//! In-process publish/subscribe with drop-on-full delivery.
//!
//! Every subscriber owns a bounded crossbeam mailbox and a worker thread that
//! hands events to its handler in publish order. `publish()` uses `try_send()`,
//! so a slow subscriber loses events instead of stalling the cleanup path; the
//! loss is counted per subscriber.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{Sender, TrySendError, bounded};
use parking_lot::RwLock;

use crate::core::errors::{Result, SpwError};
use crate::events::types::{Event, EventPayload};

/// Mailbox size used by [`EventBus::default`].
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

struct Subscription {
    name: String,
    tx: Option<Sender<Event>>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

struct BusInner {
    capacity: usize,
    closed: AtomicBool,
    subscribers: RwLock<Vec<Subscription>>,
}

/// Cloneable handle to one bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish()
    }
}

impl EventBus {
    /// Bus whose subscribers each get a mailbox of `capacity` (min 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Register `handler` behind its own mailbox and worker thread.
    pub fn subscribe<F>(&self, name: impl Into<String>, mut handler: F) -> Result<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let name = name.into();
        let mut subscribers = self.inner.subscribers.write();
        if self.is_closed() {
            return Err(SpwError::ChannelClosed {
                component: "event bus",
            });
        }

        let (tx, rx) = bounded::<Event>(self.inner.capacity);
        let worker = thread::Builder::new()
            .name(format!("spw-sub-{name}"))
            .spawn(move || {
                for event in &rx {
                    handler(event);
                }
            })
            .map_err(|e| SpwError::Runtime {
                details: format!("failed to spawn subscriber {name}: {e}"),
            })?;

        subscribers.push(Subscription {
            name,
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Some(worker),
        });
        Ok(())
    }

    /// Deliver to every mailbox without blocking. Never fails; no-op once closed.
    pub fn publish(&self, mut event: Event) {
        if self.is_closed() {
            return;
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }

        let subscribers = self.inner.subscribers.read();
        for sub in subscribers.iter() {
            let Some(tx) = sub.tx.as_ref() else {
                continue;
            };
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn publish_typed(&self, payload: impl Into<EventPayload>) {
        self.publish(Event::new(payload));
    }

    /// Stop accepting events, close every mailbox, and wait for each worker
    /// to drain what it already holds. Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let workers: Vec<(String, JoinHandle<()>)> = {
            let mut subscribers = self.inner.subscribers.write();
            subscribers
                .iter_mut()
                .filter_map(|sub| {
                    sub.tx = None;
                    sub.worker.take().map(|w| (sub.name.clone(), w))
                })
                .collect()
        };

        for (name, worker) in workers {
            if worker.join().is_err() {
                eprintln!("[SPW-BUS] subscriber {name} panicked");
            }
        }
    }

    /// Events dropped so far, per subscriber, in subscription order.
    #[must_use]
    pub fn dropped_events(&self) -> Vec<(String, u64)> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|sub| (sub.name.clone(), sub.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.dropped_events().iter().map(|(_, n)| n).sum()
    }

    #[must_use]
    pub fn subscriber_names(&self) -> Vec<String> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|sub| sub.name.clone())
            .collect()
    }
}
