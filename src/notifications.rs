//! Bounded, auto-expiring notification queue surfaced to the UI.
//!
//! At most `max_visible` notifications are retained. When a push would exceed
//! the cap the oldest non-persistent notification is evicted, or the oldest
//! persistent one if nothing else is left. Every non-persistent notification
//! owns one auto-dismiss task, tracked by id in a `DashMap`; whichever of
//! dismiss/expire/evict/clear removes the map entry first is the only one
//! that touches the task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hub::{SubscriberHub, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// A user-facing alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Persistent notifications never auto-expire.
    pub persistent: bool,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: format!("ntf-{}", Uuid::new_v4()),
            kind,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            persistent: false,
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Changes to the queue, published to queue subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Pushed(Notification),
    Dismissed { id: String },
    Expired { id: String },
    Evicted { id: String },
    Cleared,
}

pub struct NotificationQueue {
    items: Mutex<VecDeque<Notification>>,
    timers: DashMap<String, JoinHandle<()>>,
    max_visible: usize,
    auto_hide: Duration,
    events: SubscriberHub<NotificationEvent>,
    disposed: AtomicBool,
}

impl NotificationQueue {
    pub fn new(max_visible: usize, auto_hide: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            timers: DashMap::new(),
            max_visible: max_visible.max(1),
            auto_hide,
            events: SubscriberHub::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Enqueue `notification`, evicting to stay within the cap. Returns its id.
    ///
    /// A notification reusing an id already in the queue replaces it.
    pub fn push(self: &Arc<Self>, notification: Notification) -> String {
        let id = notification.id.clone();
        let mut published = Vec::new();

        {
            let mut items = self.items.lock();

            if let Some(pos) = items.iter().position(|n| n.id == id) {
                items.remove(pos);
                self.cancel_timer(&id);
            }

            while items.len() >= self.max_visible {
                let victim = items.iter().position(|n| !n.persistent).unwrap_or(0);
                if let Some(evicted) = items.remove(victim) {
                    self.cancel_timer(&evicted.id);
                    log::debug!("NotificationQueue: evicted {}", evicted.id);
                    published.push(NotificationEvent::Evicted { id: evicted.id });
                }
            }

            if !notification.persistent {
                self.schedule_expiry(&id);
            }
            items.push_back(notification.clone());
        }

        published.push(NotificationEvent::Pushed(notification));
        for event in &published {
            self.events.publish(event);
        }
        id
    }

    /// Remove a notification and cancel its auto-dismiss. Returns false when
    /// the id is not queued.
    pub fn dismiss(&self, id: &str) -> bool {
        let removed = {
            let mut items = self.items.lock();
            let removed = match items.iter().position(|n| n.id == id) {
                Some(pos) => items.remove(pos).is_some(),
                None => false,
            };
            self.cancel_timer(id);
            removed
        };

        if removed {
            self.events.publish(&NotificationEvent::Dismissed { id: id.to_string() });
        }
        removed
    }

    /// Current notifications, oldest first.
    pub fn list(&self) -> Vec<Notification> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn max_visible(&self) -> usize {
        self.max_visible
    }

    /// Number of auto-dismiss tasks still pending.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn clear(&self) {
        {
            let mut items = self.items.lock();
            items.clear();
            self.abort_all_timers();
        }
        self.events.publish(&NotificationEvent::Cleared);
    }

    /// Cancel every pending auto-dismiss. Notifications pushed afterwards are
    /// kept until dismissed explicitly.
    pub fn shutdown(&self) {
        self.disposed.store(true, Ordering::Release);
        let _items = self.items.lock();
        self.abort_all_timers();
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Must be called with `items` locked so the timer entry exists before
    /// the expiry task can observe the queue.
    fn schedule_expiry(self: &Arc<Self>, id: &str) {
        if self.disposed.load(Ordering::Acquire) {
            log::debug!("NotificationQueue: disposed, not scheduling expiry for {}", id);
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("NotificationQueue: no async runtime, {} will not auto-dismiss", id);
                return;
            }
        };

        let queue: Weak<Self> = Arc::downgrade(self);
        let delay = self.auto_hide;
        let task_id = id.to_string();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.expire(&task_id);
            }
        });
        self.timers.insert(id.to_string(), handle);
    }

    fn expire(&self, id: &str) {
        let removed = {
            let mut items = self.items.lock();
            // Our own handle; nothing left to abort.
            if self.timers.remove(id).is_none() {
                return;
            }
            match items.iter().position(|n| n.id == id) {
                Some(pos) => items.remove(pos).is_some(),
                None => false,
            }
        };

        if removed {
            log::debug!("NotificationQueue: auto-dismissed {}", id);
            self.events.publish(&NotificationEvent::Expired { id: id.to_string() });
        }
    }

    fn cancel_timer(&self, id: &str) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.abort();
        }
    }

    fn abort_all_timers(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}

impl Drop for NotificationQueue {
    fn drop(&mut self) {
        self.abort_all_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_visible: usize) -> Arc<NotificationQueue> {
        Arc::new(NotificationQueue::new(max_visible, Duration::from_secs(5)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_six_pushes_keep_five_and_drop_first() {
        let q = queue(5);
        let ids: Vec<String> = (0..6)
            .map(|i| q.push(Notification::info(format!("n{}", i), "msg")))
            .collect();

        let listed: Vec<String> = q.list().into_iter().map(|n| n.id).collect();
        assert_eq!(listed.len(), 5);
        assert!(!listed.contains(&ids[0]));
        assert_eq!(listed, ids[1..].to_vec());
        assert_eq!(q.pending_timers(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_prefers_non_persistent() {
        let q = queue(3);
        let sticky = q.push(Notification::error("sticky", "stays").persistent());
        let transient = q.push(Notification::info("a", "goes"));
        q.push(Notification::info("b", "stays"));
        q.push(Notification::info("c", "stays"));

        let listed: Vec<String> = q.list().into_iter().map(|n| n.id).collect();
        assert!(listed.contains(&sticky));
        assert!(!listed.contains(&transient));
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_persistent_evicts_oldest() {
        let q = queue(2);
        let first = q.push(Notification::warning("1", "").persistent());
        q.push(Notification::warning("2", "").persistent());
        q.push(Notification::warning("3", "").persistent());

        let listed: Vec<String> = q.list().into_iter().map(|n| n.id).collect();
        assert_eq!(listed.len(), 2);
        assert!(!listed.contains(&first));
        assert_eq!(q.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_holds_for_long_sequences() {
        let q = queue(4);
        for i in 0..50 {
            let n = Notification::info(format!("{}", i), "");
            q.push(if i % 3 == 0 { n.persistent() } else { n });
            assert!(q.len() <= 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_dismiss_after_delay() {
        let q = queue(5);
        q.push(Notification::success("saved", ""));
        q.push(Notification::info("pinned", "").persistent());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(q.len(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let remaining = q.list();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].persistent);
        assert_eq!(q.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_cancels_timer_once() {
        let q = queue(5);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = q.subscribe(move |e| sink.lock().push(e.clone()));

        let id = q.push(Notification::info("x", ""));
        assert!(q.dismiss(&id));
        assert!(!q.dismiss(&id));
        assert_eq!(q.pending_timers(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let events = events.lock();
        let dismissals = events
            .iter()
            .filter(|e| matches!(e, NotificationEvent::Dismissed { .. } | NotificationEvent::Expired { .. }))
            .count();
        assert_eq!(dismissals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timers() {
        let q = queue(5);
        q.push(Notification::info("a", ""));
        q.push(Notification::info("b", ""));
        q.shutdown();
        assert_eq!(q.pending_timers(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(q.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_removes_everything() {
        let q = queue(5);
        q.push(Notification::info("a", ""));
        q.push(Notification::error("b", "").persistent());
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.pending_timers(), 0);
    }

    #[test]
    fn test_push_without_runtime_keeps_notification() {
        let q = queue(5);
        q.push(Notification::info("a", ""));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pending_timers(), 0);
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let n = Notification::warning("t", "m");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "warning");
        assert_eq!(json["persistent"], false);
        assert!(n.id.starts_with("ntf-"));
    }
}
