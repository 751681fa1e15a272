//! Monitoring service facade.
//!
//! One constructed `MonitoringService` owns the record store, subscriber hub,
//! notification queue and polling reconciler, wired to an injected
//! `RecordSource`. Several services can coexist; nothing here is global.
//!
//! Read path: cached set when fresh, otherwise fetch-decode-replace. Upstream
//! failures never escape as faults while a stale copy exists; they surface
//! as notifications instead.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::anomaly::{default_detector, Anomaly, AnomalyDetector, DetectionContext, Severity};
use crate::cache::{CachePayload, RecordStore, ALL_RECORDS_KEY, STATISTICS_KEY};
use crate::client::RecordSource;
use crate::config::MonitorConfig;
use crate::decode::{decode_records, decode_statistics};
use crate::error::MonitorError;
use crate::events::MonitorEvent;
use crate::hub::{SubscriberHub, Subscription};
use crate::notifications::{Notification, NotificationQueue};
use crate::poller::{rejection_notice, PollOutcome, Reconciler};
use crate::scoring::{assess, RiskAssessment, RiskBand};
use crate::search::{filter_records, search_cache_key, SearchFilters};
use crate::statistics::{compute_statistics, Statistics};
use crate::types::Record;

/// Result of one scoring and detection pass over the full record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub assessments: Vec<RiskAssessment>,
    pub anomalies: Vec<Anomaly>,
}

impl AnalysisReport {
    pub fn high_risk(&self) -> impl Iterator<Item = &RiskAssessment> {
        self.assessments.iter().filter(|a| a.band == RiskBand::High)
    }
}

pub struct MonitoringService {
    config: MonitorConfig,
    source: Arc<dyn RecordSource>,
    store: Arc<RecordStore>,
    events: Arc<SubscriberHub<MonitorEvent>>,
    notifications: Arc<NotificationQueue>,
    reconciler: Arc<Reconciler>,
    detector: AnomalyDetector,
    forwarding: Subscription,
}

impl MonitoringService {
    /// Build a service. Invalid configuration is rejected here and nowhere
    /// later.
    pub fn new(config: MonitorConfig, source: Arc<dyn RecordSource>) -> Result<Self, MonitorError> {
        config.validate()?;

        let store = Arc::new(RecordStore::new());
        let events: Arc<SubscriberHub<MonitorEvent>> = Arc::new(SubscriberHub::new());
        let notifications = Arc::new(NotificationQueue::new(
            config.max_visible_notifications,
            config.notification_auto_hide(),
        ));

        let forwarding = {
            let events = events.clone();
            notifications.subscribe(move |event| {
                events.publish(&MonitorEvent::Notification(event.clone()));
            })
        };

        let reconciler = Arc::new(Reconciler::new(
            source.clone(),
            store.clone(),
            notifications.clone(),
            events.clone(),
            Utc::now(),
        ));

        log::info!(
            "MonitoringService: ready (poll every {} ms, cache fresh for {} ms)",
            config.poll_interval_ms,
            config.cache_freshness_ms
        );

        Ok(Self {
            config,
            source,
            store,
            events,
            notifications,
            reconciler,
            detector: default_detector(),
            forwarding,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<RecordStore> {
        self.store.clone()
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Full record set, from cache while fresh.
    pub async fn get_all_records(&self) -> Result<Vec<Record>, MonitorError> {
        if let Some(entry) = self.store.get(ALL_RECORDS_KEY) {
            if entry.is_fresh(self.config.cache_freshness(), Utc::now()) {
                if let Some(records) = entry.payload.records() {
                    return Ok(records.to_vec());
                }
            }
        }
        self.load_records().await
    }

    /// Full record set, always fetched from upstream.
    pub async fn refresh_records(&self) -> Result<Vec<Record>, MonitorError> {
        self.load_records().await
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<Record>, MonitorError> {
        let records = self.get_all_records().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    /// Fetch and replace the full set. Polls are held off from before the
    /// fetch until the replacement lands, so a delta merged meanwhile cannot
    /// be overwritten by the older snapshot.
    async fn load_records(&self) -> Result<Vec<Record>, MonitorError> {
        let _sync = self.reconciler.lock_sync().await;
        let fetched_at = Utc::now();
        let decoded = match self.source.fetch_all().await {
            Ok(payload) => decode_records(&payload),
            Err(e) => Err(MonitorError::from(e)),
        };

        match decoded {
            Ok(batch) => {
                if let Some(notice) = rejection_notice(&batch.rejected) {
                    self.notifications.push(notice);
                }
                let count = batch.records.len();
                self.store.replace_records(batch.records.clone());
                self.reconciler.advance_last_update(fetched_at);
                log::info!("MonitoringService: loaded {} records", count);
                self.events.publish(&MonitorEvent::RecordsLoaded { count });
                Ok(batch.records)
            }
            Err(e) => {
                log::warn!("MonitoringService: record fetch failed: {}", e);
                let stale = self
                    .store
                    .get(ALL_RECORDS_KEY)
                    .and_then(|entry| entry.payload.records().map(|r| r.to_vec()));
                match stale {
                    Some(records) => {
                        self.notifications.push(Notification::warning(
                            "Showing cached data",
                            format!("{} {}", e, e.recovery_suggestion()),
                        ));
                        Ok(records)
                    }
                    None => {
                        self.notifications.push(Notification::error(
                            "Could not load patients",
                            format!("{} {}", e, e.recovery_suggestion()),
                        ));
                        Err(e)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Search and statistics
    // -----------------------------------------------------------------------

    /// Upstream search, cached per query and filters. Falls back to matching
    /// the cached record set locally when the upstream search fails.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Record>, MonitorError> {
        let key = search_cache_key(query, filters);
        if let Some(entry) = self.store.get(&key) {
            if entry.is_fresh(self.config.cache_freshness(), Utc::now()) {
                if let Some(records) = entry.payload.records() {
                    return Ok(records.to_vec());
                }
            }
        }

        let decoded = match self.source.search(query, filters).await {
            Ok(payload) => decode_records(&payload),
            Err(e) => Err(MonitorError::from(e)),
        };

        match decoded {
            Ok(batch) => {
                if let Some(notice) = rejection_notice(&batch.rejected) {
                    self.notifications.push(notice);
                }
                self.store.put(&key, CachePayload::Records(batch.records.clone()));
                Ok(batch.records)
            }
            Err(e) => {
                log::warn!("MonitoringService: search '{}' failed: {}", query, e);
                let cached = self
                    .store
                    .get(ALL_RECORDS_KEY)
                    .and_then(|entry| entry.payload.records().map(|r| r.to_vec()));
                match cached {
                    Some(records) => {
                        self.notifications.push(Notification::warning(
                            "Search is offline",
                            "Showing matches from cached patients.",
                        ));
                        Ok(filter_records(&records, query, filters))
                    }
                    None => {
                        self.notifications.push(Notification::error(
                            "Search failed",
                            format!("{} {}", e, e.recovery_suggestion()),
                        ));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Upstream statistics, cached; computed locally from the record set when
    /// upstream cannot serve them.
    pub async fn get_statistics(&self) -> Result<Statistics, MonitorError> {
        if let Some(entry) = self.store.get(STATISTICS_KEY) {
            if entry.is_fresh(self.config.cache_freshness(), Utc::now()) {
                if let Some(stats) = entry.payload.statistics() {
                    return Ok(stats.clone());
                }
            }
        }

        let decoded = match self.source.fetch_statistics().await {
            Ok(payload) => decode_statistics(&payload),
            Err(e) => Err(MonitorError::from(e)),
        };

        match decoded {
            Ok(stats) => {
                self.store.put(STATISTICS_KEY, CachePayload::Statistics(stats.clone()));
                Ok(stats)
            }
            Err(e) => {
                log::warn!(
                    "MonitoringService: statistics unavailable ({}), computing locally",
                    e
                );
                let records = self.get_all_records().await?;
                self.notifications.push(Notification::warning(
                    "Statistics computed locally",
                    "Figures reflect the patients currently loaded.",
                ));
                Ok(compute_statistics(
                    &records,
                    Utc::now(),
                    self.config.recent_admission_threshold(),
                ))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    pub fn assess(&self, record: &Record) -> RiskAssessment {
        assess(record, &self.config, Utc::now())
    }

    pub async fn assess_all(&self) -> Result<Vec<RiskAssessment>, MonitorError> {
        let now = Utc::now();
        let records = self.get_all_records().await?;
        Ok(records
            .iter()
            .map(|record| assess(record, &self.config, now))
            .collect())
    }

    pub fn detect(&self, records: &[Record]) -> Vec<Anomaly> {
        let ctx = DetectionContext {
            now: Utc::now(),
            config: &self.config,
        };
        self.detector.detect(records, &ctx)
    }

    /// Score and scan the full record set, then report the results as
    /// notifications and an `AnalysisCompleted` event.
    pub async fn run_analysis(&self) -> Result<AnalysisReport, MonitorError> {
        let records = self.get_all_records().await?;
        let now = Utc::now();
        let ctx = DetectionContext {
            now,
            config: &self.config,
        };

        let report = AnalysisReport {
            assessments: records
                .iter()
                .map(|record| assess(record, &self.config, now))
                .collect(),
            anomalies: self.detector.detect(&records, &ctx),
        };

        let high_risk = report.high_risk().count();
        let anomalies = report.anomalies.len();
        log::info!(
            "MonitoringService: analysis over {} records: {} high risk, {} anomalies",
            records.len(),
            high_risk,
            anomalies
        );

        if high_risk > 0 {
            self.notifications.push(Notification::warning(
                "High-risk patients",
                format!("{} patient(s) need urgent attention", high_risk),
            ));
        }
        if anomalies > 0 {
            let severe = report
                .anomalies
                .iter()
                .filter(|a| a.severity == Severity::High)
                .count();
            let notice = if severe > 0 {
                Notification::error(
                    "Anomalies detected",
                    format!("{} anomalies, {} high severity", anomalies, severe),
                )
            } else {
                Notification::warning("Anomalies detected", format!("{} anomalies", anomalies))
            };
            self.notifications.push(notice);
        }

        self.events.publish(&MonitorEvent::AnalysisCompleted {
            high_risk,
            anomalies,
        });
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub fn notify(&self, notification: Notification) -> String {
        self.notifications.push(notification)
    }

    pub fn dismiss_notification(&self, id: &str) -> bool {
        self.notifications.dismiss(id)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.list()
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    pub fn start_polling(&self) -> Result<(), MonitorError> {
        self.reconciler.start(self.config.poll_interval())
    }

    pub fn stop_polling(&self) -> bool {
        self.reconciler.stop()
    }

    pub fn is_polling(&self) -> bool {
        self.reconciler.is_running()
    }

    /// Run one poll now, outside the timer. Skipped while a tick or a full
    /// reload is in flight.
    pub async fn poll_now(&self) -> PollOutcome {
        self.reconciler.poll_once().await
    }

    /// Stop polling and cancel every pending auto-dismiss timer.
    pub fn shutdown(&self) {
        self.reconciler.stop();
        self.notifications.shutdown();
        self.forwarding.unsubscribe();
        log::info!("MonitoringService: shut down");
    }
}
