//! Boundary decoder for upstream payloads.
//!
//! The upstream API is not consistent about envelopes or field names. This
//! module normalizes every variant we accept into the canonical types and
//! rejects anything else explicitly, per record where possible and per batch
//! when the envelope itself is unrecognizable.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::MonitorError;
use crate::statistics::Statistics;
use crate::types::{Contact, Record, RecordStatus, UpdateDelta};

const LIST_KEYS: &[&str] = &["results", "patients", "records"];
const DELTA_FLAG_KEYS: &[&str] = &["hasNewRecords", "hasNewPatients", "has_new_records"];
const DELTA_LIST_KEYS: &[&str] = &["newRecords", "newPatients", "records", "new_records"];
const DELTA_AS_OF_KEYS: &[&str] = &["asOf", "timestamp", "lastUpdate", "as_of"];
const ADMITTED_KEYS: &[&str] = &["admittedAt", "admissionDate", "admission_date", "createdAt"];

/// A record the decoder refused, with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    pub records: Vec<Record>,
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDelta {
    pub delta: UpdateDelta,
    pub rejected: Vec<RejectedRecord>,
}

/// Decode a record list payload.
///
/// Accepts a bare array, `{results|patients|records: [...]}`, or any of
/// those wrapped in `{data: ...}`.
pub fn decode_records(payload: &Value) -> Result<DecodedBatch, MonitorError> {
    let items = record_items(payload).ok_or_else(|| {
        MonitorError::Validation(format!(
            "Unrecognized record list payload ({})",
            describe(payload)
        ))
    })?;
    Ok(decode_items(items))
}

/// Decode an "updates since" payload.
pub fn decode_delta(payload: &Value) -> Result<DecodedDelta, MonitorError> {
    let obj = delta_object(payload).ok_or_else(|| {
        MonitorError::Validation(format!("Unrecognized update payload ({})", describe(payload)))
    })?;

    let as_of_raw = first_present(obj, DELTA_AS_OF_KEYS)
        .ok_or_else(|| MonitorError::Validation("Update payload has no asOf timestamp".to_string()))?;
    let as_of = parse_timestamp(as_of_raw).ok_or_else(|| {
        MonitorError::Validation(format!("Update payload has invalid asOf: {}", as_of_raw))
    })?;

    let items = match first_present(obj, DELTA_LIST_KEYS) {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Null) | None => &[],
        Some(other) => {
            return Err(MonitorError::Validation(format!(
                "Update record list is not an array ({})",
                describe(other)
            )))
        }
    };

    let flag = first_present(obj, DELTA_FLAG_KEYS).and_then(Value::as_bool);
    let batch = match flag {
        Some(false) => {
            if !items.is_empty() {
                log::warn!(
                    "Decode: update flagged hasNewRecords=false but carried {} records; ignoring them",
                    items.len()
                );
            }
            DecodedBatch::default()
        }
        _ => decode_items(items),
    };

    Ok(DecodedDelta {
        delta: UpdateDelta::new(batch.records, as_of),
        rejected: batch.rejected,
    })
}

/// Decode an upstream statistics payload, optionally wrapped in `{data: ...}`.
pub fn decode_statistics(payload: &Value) -> Result<Statistics, MonitorError> {
    let inner = match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => payload,
    };
    if !inner.is_object() {
        return Err(MonitorError::Validation(format!(
            "Unrecognized statistics payload ({})",
            describe(payload)
        )));
    }
    serde_json::from_value(inner.clone())
        .map_err(|e| MonitorError::Validation(format!("Invalid statistics payload: {}", e)))
}

/// Normalize a single upstream record object.
pub fn decode_record(value: &Value) -> Result<Record, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", describe(value)))?;

    let id = match obj.get("id").or_else(|| obj.get("patientId")) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
        _ => return Err("missing identifier".to_string()),
    };

    let name = match str_field(obj, "name") {
        Some(name) => name,
        None => {
            let parts: Vec<String> = ["firstName", "lastName"]
                .iter()
                .filter_map(|k| str_field(obj, k))
                .collect();
            if parts.is_empty() {
                id.clone()
            } else {
                parts.join(" ")
            }
        }
    };

    let (status, raw_status) = match str_field(obj, "status") {
        Some(raw) => match RecordStatus::parse(&raw) {
            Some(status) => (status, None),
            None => {
                log::debug!("Decode: unknown status '{}' on {}, treating as Active", raw, id);
                (RecordStatus::Active, Some(raw))
            }
        },
        None => (RecordStatus::Active, None),
    };

    let admitted_at = first_present(obj, ADMITTED_KEYS).and_then(parse_timestamp);

    let contact = match obj.get("contact").and_then(Value::as_object) {
        Some(c) => Contact {
            phone: str_field(c, "phone"),
            email: str_field(c, "email"),
        },
        None => Contact {
            phone: str_field(obj, "phone"),
            email: str_field(obj, "email"),
        },
    };

    Ok(Record {
        id,
        name,
        age: obj.get("age").and_then(parse_age),
        department: str_field(obj, "department").unwrap_or_default(),
        status,
        raw_status,
        admitted_at,
        diagnosis: str_field(obj, "diagnosis"),
        contact,
    })
}

fn decode_items(items: &[Value]) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    let mut positions: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for (index, item) in items.iter().enumerate() {
        match decode_record(item) {
            Ok(record) => match positions.get(&record.id) {
                // Last occurrence wins, first position is kept.
                Some(&pos) => batch.records[pos] = record,
                None => {
                    positions.insert(record.id.clone(), batch.records.len());
                    batch.records.push(record);
                }
            },
            Err(reason) => {
                log::warn!("Decode: dropping record #{}: {}", index, reason);
                batch.rejected.push(RejectedRecord { index, reason });
            }
        }
    }
    batch
}

fn record_items(payload: &Value) -> Option<&[Value]> {
    match payload {
        Value::Array(items) => Some(items.as_slice()),
        Value::Object(obj) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(items)) = obj.get(*key) {
                    return Some(items.as_slice());
                }
            }
            match obj.get("data") {
                Some(data) => record_items(data),
                None => None,
            }
        }
        _ => None,
    }
}

fn delta_object(payload: &Value) -> Option<&Map<String, Value>> {
    let obj = payload.as_object()?;
    let has_delta_keys = DELTA_AS_OF_KEYS
        .iter()
        .chain(DELTA_FLAG_KEYS)
        .any(|k| obj.contains_key(*k));
    if has_delta_keys {
        return Some(obj);
    }
    obj.get("data").and_then(Value::as_object)
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_age(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                u32::try_from(v).ok()
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.floor() as u32)
            }
        }
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (read as UTC), `YYYY-MM-DD`, or epoch
/// milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
