//! Aggregate statistics over a record set.
//!
//! The upstream API can serve these; `compute_statistics` is the local
//! computation used when it cannot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Record, RecordStatus};

const UNASSIGNED_DEPARTMENT: &str = "Unassigned";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub by_status: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_department: BTreeMap<String, usize>,
    #[serde(default)]
    pub critical: usize,
    #[serde(default)]
    pub average_age: Option<f64>,
    #[serde(default)]
    pub recent_admissions: usize,
}

/// Summarize `records`. Records admitted within `recent_window` of `now`
/// count as recent admissions; records without an age are left out of the
/// average.
pub fn compute_statistics(
    records: &[Record],
    now: DateTime<Utc>,
    recent_window: chrono::Duration,
) -> Statistics {
    let mut by_status: BTreeMap<String, usize> = RecordStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let mut by_department: BTreeMap<String, usize> = BTreeMap::new();
    let mut age_sum: u64 = 0;
    let mut age_count: u64 = 0;
    let mut recent_admissions = 0;

    for record in records {
        *by_status.entry(record.status.as_str().to_string()).or_default() += 1;

        let department = record.department.trim();
        let department = if department.is_empty() {
            UNASSIGNED_DEPARTMENT
        } else {
            department
        };
        *by_department.entry(department.to_string()).or_default() += 1;

        if let Some(age) = record.age {
            age_sum += u64::from(age);
            age_count += 1;
        }

        if let Some(admitted) = record.admitted_at {
            if now - admitted < recent_window {
                recent_admissions += 1;
            }
        }
    }

    let average_age = if age_count > 0 {
        Some(((age_sum as f64 / age_count as f64) * 10.0).round() / 10.0)
    } else {
        None
    };

    Statistics {
        total: records.len(),
        critical: by_status
            .get(RecordStatus::Critical.as_str())
            .copied()
            .unwrap_or(0),
        by_status,
        by_department,
        average_age,
        recent_admissions,
    }
}
