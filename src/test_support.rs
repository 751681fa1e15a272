//! Scripted upstream source and fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::client::RecordSource;
use crate::error::FetchError;
use crate::search::SearchFilters;

/// A `RecordSource` that replays scripted responses. `Err(msg)` entries come
/// back as `FetchError::Network(msg)`.
pub struct FakeSource {
    pub all: Mutex<Result<Value, String>>,
    pub updates: Mutex<VecDeque<Result<Value, String>>>,
    pub search_result: Mutex<Result<Value, String>>,
    pub statistics: Mutex<Result<Value, String>>,
    pub all_delay: Mutex<Option<Duration>>,
    pub update_delay: Mutex<Option<Duration>>,
    pub since_seen: Mutex<Vec<DateTime<Utc>>>,
    pub all_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub statistics_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            all: Mutex::new(Ok(json!([]))),
            updates: Mutex::new(VecDeque::new()),
            search_result: Mutex::new(Ok(json!([]))),
            statistics: Mutex::new(Err("statistics unavailable".to_string())),
            all_delay: Mutex::new(None),
            update_delay: Mutex::new(None),
            since_seen: Mutex::new(Vec::new()),
            all_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            statistics_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_records(records: Value) -> Self {
        let source = Self::new();
        *source.all.lock() = Ok(records);
        source
    }

    pub fn push_update(&self, response: Result<Value, String>) {
        self.updates.lock().push_back(response);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn scripted(response: Result<Value, String>) -> Result<Value, FetchError> {
    response.map_err(FetchError::Network)
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn fetch_all(&self) -> Result<Value, FetchError> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.all_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.all.lock().clone();
        scripted(response)
    }

    async fn fetch_updates_since(&self, since: DateTime<Utc>) -> Result<Value, FetchError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.since_seen.lock().push(since);
        let delay = *self.update_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.updates.lock().pop_front();
        match next {
            Some(response) => scripted(response),
            None => Ok(delta_json(&[], Utc::now())),
        }
    }

    async fn search(&self, _query: &str, _filters: &SearchFilters) -> Result<Value, FetchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.search_result.lock().clone();
        scripted(response)
    }

    async fn fetch_statistics(&self) -> Result<Value, FetchError> {
        self.statistics_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.statistics.lock().clone();
        scripted(response)
    }
}

/// Upstream-shaped patient object.
pub fn patient_json(id: &str, name: &str, age: u32, department: &str, status: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "age": age,
        "department": department,
        "status": status,
        "admissionDate": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

/// Upstream-shaped "updates since" payload.
pub fn delta_json(records: &[Value], as_of: DateTime<Utc>) -> Value {
    json!({
        "hasNewPatients": !records.is_empty(),
        "newPatients": records,
        "timestamp": as_of.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
