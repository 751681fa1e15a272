//! In-memory record store.
//!
//! Keyed storage of fetched payloads with capture timestamps. The store never
//! expires anything itself: callers decide staleness with `CacheEntry::is_fresh`
//! against their own freshness window. Entries are immutable once stored;
//! every write produces a new `Arc<CacheEntry>` with a new timestamp, so a
//! reader holding an old entry keeps a consistent snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::statistics::Statistics;
use crate::types::Record;

/// Key of the full record set.
pub const ALL_RECORDS_KEY: &str = "records:all";

/// Key of the upstream statistics payload.
pub const STATISTICS_KEY: &str = "statistics";

/// Prefix for cached search results.
pub const SEARCH_KEY_PREFIX: &str = "search:";

#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    Records(Vec<Record>),
    Statistics(Statistics),
}

impl CachePayload {
    pub fn records(&self) -> Option<&[Record]> {
        match self {
            CachePayload::Records(records) => Some(records),
            _ => None,
        }
    }

    pub fn statistics(&self) -> Option<&Statistics> {
        match self {
            CachePayload::Statistics(stats) => Some(stats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachePayload,
    pub captured_at: DateTime<Utc>,
}

impl CacheEntry {
    /// True while `now - captured_at` is within `window`.
    pub fn is_fresh(&self, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.captured_at < window
    }
}

/// Result of merging a batch of records into the full record set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Ids that were not present before, in batch order.
    pub inserted: Vec<String>,
    /// Ids that were present and whose contents changed.
    pub updated: Vec<String>,
    /// Ids that were present with identical contents.
    pub unchanged: Vec<String>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty()
    }
}

#[derive(Default)]
pub struct RecordStore {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.read().get(key).cloned();
        log::debug!(
            "RecordStore: {} for '{}'",
            if entry.is_some() { "hit" } else { "miss" },
            key
        );
        entry
    }

    /// Store `payload` under `key`, replacing any previous entry.
    pub fn put(&self, key: &str, payload: CachePayload) -> Arc<CacheEntry> {
        let entry = new_entry(key, payload);
        self.entries.write().insert(key.to_string(), entry.clone());
        entry
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of the full record set; empty when nothing has been loaded.
    pub fn records(&self) -> Vec<Record> {
        self.get(ALL_RECORDS_KEY)
            .and_then(|entry| entry.payload.records().map(|r| r.to_vec()))
            .unwrap_or_default()
    }

    pub fn record_count(&self) -> usize {
        self.entries
            .read()
            .get(ALL_RECORDS_KEY)
            .and_then(|entry| entry.payload.records().map(|r| r.len()))
            .unwrap_or(0)
    }

    pub fn record(&self, id: &str) -> Option<Record> {
        self.entries
            .read()
            .get(ALL_RECORDS_KEY)
            .and_then(|entry| entry.payload.records()?.iter().find(|r| r.id == id).cloned())
    }

    /// Replace the full record set and drop results derived from the old one.
    pub fn replace_records(&self, records: Vec<Record>) -> Arc<CacheEntry> {
        let mut entries = self.entries.write();
        invalidate_derived(&mut entries);
        let entry = new_entry(ALL_RECORDS_KEY, CachePayload::Records(records));
        entries.insert(ALL_RECORDS_KEY.to_string(), entry.clone());
        entry
    }

    /// Upsert `incoming` into the full record set by id.
    ///
    /// Existing records keep their position; new ids are appended in batch
    /// order. The whole read-modify-write runs under one write lock, so
    /// concurrent merges are serialized and readers never see a partial set.
    /// Merging the same batch twice leaves the set unchanged the second time.
    pub fn merge_records(&self, incoming: Vec<Record>) -> MergeOutcome {
        let mut entries = self.entries.write();

        let mut records: Vec<Record> = entries
            .get(ALL_RECORDS_KEY)
            .and_then(|entry| entry.payload.records().map(|r| r.to_vec()))
            .unwrap_or_default();
        let mut index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        let mut outcome = MergeOutcome::default();
        for record in incoming {
            match index.get(&record.id) {
                Some(&i) if records[i] == record => outcome.unchanged.push(record.id),
                Some(&i) => {
                    outcome.updated.push(record.id.clone());
                    records[i] = record;
                }
                None => {
                    index.insert(record.id.clone(), records.len());
                    outcome.inserted.push(record.id.clone());
                    records.push(record);
                }
            }
        }

        if outcome.changed() {
            invalidate_derived(&mut entries);
            entries.insert(
                ALL_RECORDS_KEY.to_string(),
                new_entry(ALL_RECORDS_KEY, CachePayload::Records(records)),
            );
        }

        outcome
    }
}

fn new_entry(key: &str, payload: CachePayload) -> Arc<CacheEntry> {
    Arc::new(CacheEntry {
        key: key.to_string(),
        payload,
        captured_at: Utc::now(),
    })
}

/// Drop search results and statistics computed from a previous record set.
fn invalidate_derived(entries: &mut HashMap<String, Arc<CacheEntry>>) {
    entries.retain(|key, _| key != STATISTICS_KEY && !key.starts_with(SEARCH_KEY_PREFIX));
}
