//! Events published to service subscribers.

use chrono::{DateTime, Utc};

use crate::notifications::NotificationEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The full record set was (re)loaded from upstream.
    RecordsLoaded { count: usize },
    /// A poll merged new or changed records.
    RecordsMerged {
        inserted: Vec<String>,
        updated: Vec<String>,
        as_of: DateTime<Utc>,
    },
    /// A poll tick failed; the store was left untouched.
    PollFailed { message: String },
    /// Scoring and anomaly detection finished over the current set.
    AnalysisCompleted { high_risk: usize, anomalies: usize },
    Notification(NotificationEvent),
}
