//! Background polling reconciler.
//!
//! Runs as a long-lived async task: every `interval` it asks the upstream
//! source for records changed since the last successful poll and merges them
//! into the record store by id.
//!
//! - At most one poll is in flight; a tick that finds one running, or a full
//!   reload holding the sync lock, is skipped
//! - Success: merge, advance the last-update mark to the payload's `asOf`,
//!   one info notification per newly inserted record
//! - Failure: store and mark untouched, one error notification, keep ticking
//! - `stop()` aborts the task; a tick already queued sees the stale
//!   generation and exits without polling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::RecordStore;
use crate::client::RecordSource;
use crate::decode::{decode_delta, RejectedRecord};
use crate::error::MonitorError;
use crate::events::MonitorEvent;
use crate::hub::SubscriberHub;
use crate::notifications::{Notification, NotificationQueue};

/// Result of one poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll or a full reload was still in flight.
    Skipped,
    Applied(PollSummary),
    Failed(MonitorError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub rejected: usize,
    pub as_of: DateTime<Utc>,
}

pub struct Reconciler {
    source: Arc<dyn RecordSource>,
    store: Arc<RecordStore>,
    notifications: Arc<NotificationQueue>,
    events: Arc<SubscriberHub<MonitorEvent>>,
    last_update: Mutex<DateTime<Utc>>,
    /// Held for the whole of a poll or a full reload so their writes to the
    /// store never interleave.
    sync: AsyncMutex<()>,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<RecordStore>,
        notifications: Arc<NotificationQueue>,
        events: Arc<SubscriberHub<MonitorEvent>>,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            store,
            notifications,
            events,
            last_update: Mutex::new(last_update),
            sync: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Timestamp the next poll asks for updates since.
    pub fn last_update(&self) -> DateTime<Utc> {
        *self.last_update.lock()
    }

    pub fn set_last_update(&self, at: DateTime<Utc>) {
        *self.last_update.lock() = at;
    }

    /// Move the mark forward to `at`; never moves it back.
    pub fn advance_last_update(&self, at: DateTime<Utc>) {
        let mut last = self.last_update.lock();
        if at > *last {
            *last = at;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// True while a poll or a full reload holds the sync lock.
    pub fn is_polling(&self) -> bool {
        self.sync.try_lock().is_err()
    }

    /// Wait for any in-flight poll, then keep polls out until the guard is
    /// dropped. Full reloads hold this across their fetch and replace.
    pub async fn lock_sync(&self) -> AsyncMutexGuard<'_, ()> {
        self.sync.lock().await
    }

    /// Start ticking every `interval`, first tick one interval from now.
    /// Restarting replaces the previous timer.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<(), MonitorError> {
        if interval.is_zero() {
            return Err(MonitorError::Configuration(
                "poll interval must be positive".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            MonitorError::Configuration("polling requires a running tokio runtime".to_string())
        })?;

        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let reconciler: Weak<Self> = Arc::downgrade(self);

        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let reconciler = match reconciler.upgrade() {
                    Some(r) => r,
                    None => break,
                };
                if reconciler.generation.load(Ordering::Acquire) != generation {
                    break;
                }
                reconciler.poll_once().await;
            }
        }));

        log::info!("Reconciler: polling every {} ms", interval.as_millis());
        Ok(())
    }

    /// Cancel the timer. Returns whether it was running.
    pub fn stop(&self) -> bool {
        self.generation.fetch_add(1, Ordering::AcqRel);
        match self.task.lock().take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                log::info!("Reconciler: stopped");
                was_running
            }
            None => false,
        }
    }

    /// Fetch and merge one delta.
    pub async fn poll_once(&self) -> PollOutcome {
        let _sync = match self.sync.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Reconciler: previous sync still in flight, skipping tick");
                return PollOutcome::Skipped;
            }
        };

        let since = self.last_update();
        let decoded = match self.source.fetch_updates_since(since).await {
            Ok(payload) => decode_delta(&payload),
            Err(e) => Err(MonitorError::from(e)),
        };

        let decoded = match decoded {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Reconciler: poll failed: {}", e);
                self.notifications.push(Notification::error(
                    "Update check failed",
                    format!("{} {}", e, e.recovery_suggestion()),
                ));
                self.events.publish(&MonitorEvent::PollFailed {
                    message: e.to_string(),
                });
                return PollOutcome::Failed(e);
            }
        };

        let as_of = decoded.delta.as_of;
        let outcome = self.store.merge_records(decoded.delta.new_records);
        self.set_last_update(as_of);

        if outcome.changed() {
            log::info!(
                "Reconciler: merged {} new and {} updated records (as of {})",
                outcome.inserted.len(),
                outcome.updated.len(),
                as_of.to_rfc3339()
            );
        } else {
            log::debug!("Reconciler: no changes as of {}", as_of.to_rfc3339());
        }

        if let Some(notice) = rejection_notice(&decoded.rejected) {
            self.notifications.push(notice);
        }
        for id in &outcome.inserted {
            let name = self
                .store
                .record(id)
                .map(|r| r.name)
                .unwrap_or_else(|| id.clone());
            self.notifications.push(Notification::info(
                "New patient",
                format!("{} was added to monitoring", name),
            ));
        }

        if outcome.changed() {
            self.events.publish(&MonitorEvent::RecordsMerged {
                inserted: outcome.inserted.clone(),
                updated: outcome.updated.clone(),
                as_of,
            });
        }

        PollOutcome::Applied(PollSummary {
            inserted: outcome.inserted,
            updated: outcome.updated,
            rejected: decoded.rejected.len(),
            as_of,
        })
    }
}

/// One warning summarizing records the decoder dropped from a batch.
pub(crate) fn rejection_notice(rejected: &[RejectedRecord]) -> Option<Notification> {
    if rejected.is_empty() {
        return None;
    }
    let reasons: Vec<String> = rejected
        .iter()
        .take(3)
        .map(|r| format!("#{}: {}", r.index, r.reason))
        .collect();
    Some(Notification::warning(
        "Skipped invalid records",
        format!("{} record(s) could not be read ({})", rejected.len(), reasons.join("; ")),
    ))
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationKind;
    use crate::test_support::{delta_json, patient_json, FakeSource};
    use crate::types::Record;

    struct Fixture {
        source: Arc<FakeSource>,
        store: Arc<RecordStore>,
        notifications: Arc<NotificationQueue>,
        reconciler: Arc<Reconciler>,
        started_at: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(FakeSource::new());
        let store = Arc::new(RecordStore::new());
        store.replace_records(vec![Record::new("p1", "One"), Record::new("p2", "Two")]);
        let notifications = Arc::new(NotificationQueue::new(5, Duration::from_secs(5)));
        let started_at = Utc::now();
        let reconciler = Arc::new(Reconciler::new(
            source.clone(),
            store.clone(),
            notifications.clone(),
            Arc::new(SubscriberHub::new()),
            started_at,
        ));
        Fixture {
            source,
            store,
            notifications,
            reconciler,
            started_at,
        }
    }

    fn kinds(queue: &NotificationQueue) -> Vec<NotificationKind> {
        queue.list().into_iter().map(|n| n.kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_merges_and_notifies_only_inserts() {
        let f = fixture();
        let as_of = f.started_at + chrono::Duration::seconds(30);
        f.source.push_update(Ok(delta_json(
            &[
                patient_json("p2", "Two", 50, "General", "Critical"),
                patient_json("p3", "Three", 30, "General", "Active"),
            ],
            as_of,
        )));

        let outcome = f.reconciler.poll_once().await;

        match outcome {
            PollOutcome::Applied(summary) => {
                assert_eq!(summary.inserted, vec!["p3".to_string()]);
                assert_eq!(summary.updated, vec!["p2".to_string()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(f.store.record_count(), 3);
        assert_eq!(kinds(&f.notifications), vec![NotificationKind::Info]);
        assert!(f.notifications.list()[0].message.contains("Three"));
        assert_eq!(
            f.reconciler.last_update().timestamp_millis(),
            as_of.timestamp_millis()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_delta_twice_is_idempotent() {
        let f = fixture();
        let delta = delta_json(&[patient_json("p3", "Three", 30, "General", "Active")], Utc::now());
        f.source.push_update(Ok(delta.clone()));
        f.source.push_update(Ok(delta));

        f.reconciler.poll_once().await;
        let once = f.store.records();
        let second = f.reconciler.poll_once().await;

        assert_eq!(f.store.records(), once);
        assert!(matches!(second, PollOutcome::Applied(ref s) if s.inserted.is_empty()));
        assert_eq!(f.notifications.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_leaves_state_and_keeps_ticking() {
        let f = fixture();
        f.source.push_update(Err("connection refused".to_string()));
        f.source.push_update(Ok(delta_json(
            &[patient_json("p3", "Three", 30, "General", "Active")],
            Utc::now(),
        )));

        f.reconciler.start(Duration::from_secs(30)).unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(FakeSource::calls(&f.source.update_calls), 1);
        assert_eq!(f.store.record_count(), 2);
        assert_eq!(kinds(&f.notifications), vec![NotificationKind::Error]);
        assert_eq!(f.reconciler.last_update(), f.started_at);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(FakeSource::calls(&f.source.update_calls), 2);
        assert_eq!(f.store.record_count(), 3);
        // The retry still asks from the construction-time mark.
        assert_eq!(f.source.since_seen.lock()[1], f.started_at);

        f.reconciler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_counts_as_failure() {
        let f = fixture();
        f.source.push_update(Ok(serde_json::json!({"unexpected": true})));

        let outcome = f.reconciler.poll_once().await;

        assert!(matches!(outcome, PollOutcome::Failed(MonitorError::Validation(_))));
        assert_eq!(f.store.record_count(), 2);
        assert_eq!(f.reconciler.last_update(), f.started_at);
        assert_eq!(kinds(&f.notifications), vec![NotificationKind::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_record_dropped_with_warning() {
        let f = fixture();
        f.source.push_update(Ok(serde_json::json!({
            "hasNewRecords": true,
            "newRecords": [{"name": "No id"}, {"id": "p4", "name": "Four"}],
            "asOf": Utc::now().to_rfc3339(),
        })));

        let outcome = f.reconciler.poll_once().await;

        assert!(matches!(outcome, PollOutcome::Applied(ref s) if s.rejected == 1));
        assert!(f.store.record("p4").is_some());
        assert_eq!(
            kinds(&f.notifications),
            vec![NotificationKind::Warning, NotificationKind::Info]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_poll_is_skipped() {
        let f = fixture();
        *f.source.update_delay.lock() = Some(Duration::from_secs(45));

        let first = {
            let reconciler = f.reconciler.clone();
            tokio::spawn(async move { reconciler.poll_once().await })
        };
        tokio::task::yield_now().await;
        assert!(f.reconciler.is_polling());

        assert_eq!(f.reconciler.poll_once().await, PollOutcome::Skipped);

        let first = first.await.unwrap();
        assert!(matches!(first, PollOutcome::Applied(_)));
        assert!(!f.reconciler.is_polling());
        assert_eq!(FakeSource::calls(&f.source.update_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_poll_skipped_while_tick_in_flight() {
        let f = fixture();
        *f.source.update_delay.lock() = Some(Duration::from_secs(45));

        f.reconciler.start(Duration::from_secs(30)).unwrap();
        // Tick at 30s is still waiting on the upstream at 40s.
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(f.reconciler.poll_once().await, PollOutcome::Skipped);
        assert_eq!(FakeSource::calls(&f.source.update_calls), 1);
        f.reconciler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skipped_while_reload_holds_sync() {
        let f = fixture();
        let reload = f.reconciler.lock_sync().await;

        assert!(f.reconciler.is_polling());
        assert_eq!(f.reconciler.poll_once().await, PollOutcome::Skipped);
        assert_eq!(FakeSource::calls(&f.source.update_calls), 0);

        drop(reload);
        assert!(matches!(f.reconciler.poll_once().await, PollOutcome::Applied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let f = fixture();
        f.reconciler.start(Duration::from_secs(30)).unwrap();
        assert!(f.reconciler.is_running());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(FakeSource::calls(&f.source.update_calls), 1);

        assert!(f.reconciler.stop());
        assert!(!f.reconciler.stop());
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert_eq!(FakeSource::calls(&f.source.update_calls), 1);
        assert!(!f.reconciler.is_running());
    }

    #[test]
    fn test_start_rejects_zero_interval() {
        let f = fixture();
        let err = f.reconciler.start(Duration::ZERO).unwrap_err();
        assert!(err.is_fatal());
    }
}
