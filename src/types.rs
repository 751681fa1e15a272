//! Canonical domain types shared across the monitoring core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Care status of a monitored patient.
///
/// Upstream values outside these four are normalized to `Active`; the
/// raw text is kept on `Record::raw_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecordStatus {
    #[default]
    Active,
    #[serde(rename = "Under Treatment")]
    UnderTreatment,
    Critical,
    Discharged,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 4] = [
        RecordStatus::Active,
        RecordStatus::UnderTreatment,
        RecordStatus::Critical,
        RecordStatus::Discharged,
    ];

    /// Parse a status label, ignoring case and `_`/`-`/space separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "active" => Some(RecordStatus::Active),
            "undertreatment" => Some(RecordStatus::UnderTreatment),
            "critical" => Some(RecordStatus::Critical),
            "discharged" => Some(RecordStatus::Discharged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "Active",
            RecordStatus::UnderTreatment => "Under Treatment",
            RecordStatus::Critical => "Critical",
            RecordStatus::Discharged => "Discharged",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One monitored patient's current known state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub name: String,
    /// `None` when upstream omitted or garbled the age.
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub status: RecordStatus,
    /// Upstream status text that did not map onto `RecordStatus`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_status: Option<String>,
    #[serde(default)]
    pub admitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub contact: Contact,
}

impl Record {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            age: None,
            department: String::new(),
            status: RecordStatus::Active,
            raw_status: None,
            admitted_at: None,
            diagnosis: None,
            contact: Contact::default(),
        }
    }

    /// True when `department` names this record's department, ignoring case
    /// and surrounding whitespace.
    pub fn in_department(&self, department: &str) -> bool {
        same_department(&self.department, department)
    }
}

/// Department comparison used by scoring, detection and search.
pub fn same_department(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// An incremental batch of new or changed records since a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDelta {
    pub has_new_records: bool,
    pub new_records: Vec<Record>,
    pub as_of: DateTime<Utc>,
}

impl UpdateDelta {
    pub fn new(new_records: Vec<Record>, as_of: DateTime<Utc>) -> Self {
        Self {
            has_new_records: !new_records.is_empty(),
            new_records,
            as_of,
        }
    }

    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), as_of)
    }
}
