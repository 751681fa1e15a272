//! Record search filters and the local matcher used when upstream search is
//! unavailable.

use serde::{Deserialize, Serialize};

use crate::cache::SEARCH_KEY_PREFIX;
use crate::types::{Record, RecordStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self == &SearchFilters::default()
    }

    fn matches(&self, record: &Record) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(department) = &self.department {
            if !record.in_department(department) {
                return false;
            }
        }
        if self.min_age.is_some() || self.max_age.is_some() {
            let age = match record.age {
                Some(age) => age,
                None => return false,
            };
            if self.min_age.is_some_and(|min| age < min) || self.max_age.is_some_and(|max| age > max) {
                return false;
            }
        }
        true
    }
}

/// Cache key for a search, stable for equal inputs.
pub fn search_cache_key(query: &str, filters: &SearchFilters) -> String {
    let status = filters.status.map(|s| s.as_str()).unwrap_or("");
    let department = filters
        .department
        .as_deref()
        .map(|d| d.trim().to_lowercase())
        .unwrap_or_default();
    let ages = format!(
        "{}-{}",
        filters.min_age.map(|a| a.to_string()).unwrap_or_default(),
        filters.max_age.map(|a| a.to_string()).unwrap_or_default()
    );
    format!(
        "{}{}:{}|{}|{}",
        SEARCH_KEY_PREFIX,
        query.trim().to_lowercase(),
        status,
        department,
        ages
    )
}

/// Case-insensitive substring match of `query` against id, name, diagnosis
/// and department, combined with every set filter. An empty query matches
/// every record that passes the filters.
pub fn filter_records(records: &[Record], query: &str, filters: &SearchFilters) -> Vec<Record> {
    let needle = query.trim().to_lowercase();

    records
        .iter()
        .filter(|record| filters.matches(record))
        .filter(|record| {
            if needle.is_empty() {
                return true;
            }
            [
                Some(record.id.as_str()),
                Some(record.name.as_str()),
                record.diagnosis.as_deref(),
                Some(record.department.as_str()),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}
