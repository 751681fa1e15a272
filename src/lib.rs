//! Centralized patient monitoring core.
//!
//! Caches patient records fetched from an upstream API, polls it for
//! incremental updates, scores risk, flags anomalies and keeps a bounded
//! notification queue for the UI. `MonitoringService` ties the pieces
//! together; each piece is usable on its own.

pub mod anomaly;
pub mod cache;
pub mod client;
pub mod config;
pub mod decode;
mod error;
pub mod events;
pub mod hub;
pub mod logging;
pub mod notifications;
pub mod poller;
pub mod scoring;
pub mod search;
pub mod service;
pub mod statistics;
pub mod types;

#[cfg(test)]
mod test_support;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalyKind, Severity};
pub use cache::{CacheEntry, RecordStore};
pub use client::{HttpRecordSource, HttpSourceConfig, RecordSource};
pub use config::{MismatchRule, MonitorConfig};
pub use error::{ErrorPayload, ErrorType, FetchError, MonitorError};
pub use events::MonitorEvent;
pub use hub::{SubscriberHub, Subscription};
pub use notifications::{Notification, NotificationEvent, NotificationKind, NotificationQueue};
pub use poller::{PollOutcome, Reconciler};
pub use scoring::{RiskAssessment, RiskBand};
pub use search::SearchFilters;
pub use service::{AnalysisReport, MonitoringService};
pub use statistics::Statistics;
pub use types::{Record, RecordStatus, UpdateDelta};
