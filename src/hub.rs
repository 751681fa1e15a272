//! Subscriber hub: synchronous fan-out of events to registered callbacks.
//!
//! Callbacks run in registration order on the publishing thread. A callback
//! that panics is caught and logged; the remaining callbacks still run and
//! the failing one stays registered. Each `subscribe` call is its own
//! subscription, even for identical closures.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    callback: Callback<E>,
}

struct HubInner<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
    next_id: AtomicU64,
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

impl<E: 'static> Unsubscribe for HubInner<E> {
    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// Outcome of a single `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct SubscriberHub<E> {
    inner: Arc<HubInner<E>>,
}

impl<E: 'static> Default for SubscriberHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> SubscriberHub<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback`. Keep the returned handle to unsubscribe later;
    /// dropping it leaves the callback registered.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });

        let inner: Arc<dyn Unsubscribe> = self.inner.clone();
        Subscription {
            id,
            hub: Arc::downgrade(&inner),
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// The subscriber list is snapshotted first, so callbacks may subscribe
    /// or unsubscribe while being called. A subscriber added mid-publish is
    /// first called on the next publish; one removed mid-publish is not called
    /// again, even later in this one.
    pub fn publish(&self, event: &E) -> PublishReport {
        let callbacks: Vec<(u64, Callback<E>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.callback.clone()))
            .collect();

        let mut report = PublishReport::default();
        for (id, callback) in callbacks {
            if !self.is_registered(id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    log::error!(
                        "SubscriberHub: subscriber {} panicked: {}",
                        id,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        report
    }

    fn is_registered(&self, id: u64) -> bool {
        self.inner.subscribers.lock().iter().any(|s| s.id == id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn clear(&self) {
        self.inner.subscribers.lock().clear();
    }
}

/// Handle returned by `SubscriberHub::subscribe`.
pub struct Subscription {
    id: u64,
    hub: Weak<dyn Unsubscribe>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the callback. Safe to call more than once; returns true only on
    /// the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
