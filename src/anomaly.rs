//! Rule-based anomaly detection over the full record set.
//!
//! Each rule is a pure function of one record and the detection context,
//! returning zero or more anomalies. The detector keeps no state between
//! runs: every call rescans the whole set and supersedes earlier results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::types::{Record, RecordStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyKind {
    ProlongedCritical,
    AgeDepartmentMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub record_id: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
}

/// Inputs shared by every rule in one detection pass.
pub struct DetectionContext<'a> {
    pub now: DateTime<Utc>,
    pub config: &'a MonitorConfig,
}

/// Function signature for an anomaly rule.
pub type AnomalyRule = fn(&Record, &DetectionContext) -> Vec<Anomaly>;

pub struct RuleEntry {
    pub name: String,
    pub rule: AnomalyRule,
}

#[derive(Default)]
pub struct AnomalyDetector {
    rules: Vec<RuleEntry>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, rule: AnomalyRule) {
        self.rules.push(RuleEntry {
            name: name.to_string(),
            rule,
        });
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Run every rule over every record. Results are grouped High, Medium,
    /// Low; within a group they keep record order, then rule order.
    pub fn detect(&self, records: &[Record], ctx: &DetectionContext) -> Vec<Anomaly> {
        let mut anomalies: Vec<Anomaly> = records
            .iter()
            .flat_map(|record| self.rules.iter().flat_map(move |entry| (entry.rule)(record, ctx)))
            .collect();

        // sort_by is stable
        anomalies.sort_by(|a, b| b.severity.cmp(&a.severity));

        log::debug!(
            "AnomalyDetector: {} anomalies across {} records",
            anomalies.len(),
            records.len()
        );
        anomalies
    }
}

/// Build a detector with the built-in rules registered.
pub fn default_detector() -> AnomalyDetector {
    let mut detector = AnomalyDetector::new();
    detector.register("prolonged_critical", detect_prolonged_critical);
    detector.register("age_department_mismatch", detect_age_department_mismatch);
    detector
}

/// Run the built-in rules over `records` as of `now`.
pub fn detect(records: &[Record], config: &MonitorConfig, now: DateTime<Utc>) -> Vec<Anomaly> {
    default_detector().detect(records, &DetectionContext { now, config })
}

// ---------------------------------------------------------------------------
// Rule 1: Prolonged critical
// ---------------------------------------------------------------------------

/// Critical status for longer than the configured threshold since admission.
pub fn detect_prolonged_critical(record: &Record, ctx: &DetectionContext) -> Vec<Anomaly> {
    if record.status != RecordStatus::Critical {
        return Vec::new();
    }
    let admitted = match record.admitted_at {
        Some(t) => t,
        None => return Vec::new(),
    };

    let elapsed = ctx.now - admitted;
    if elapsed <= ctx.config.prolonged_critical_threshold() {
        return Vec::new();
    }

    vec![Anomaly {
        record_id: record.id.clone(),
        kind: AnomalyKind::ProlongedCritical,
        severity: Severity::High,
        message: format!(
            "{} has been in critical condition for {} hours since admission",
            record.name,
            elapsed.num_hours()
        ),
        recommendation: "Review the treatment plan and consider specialist consultation".to_string(),
    }]
}

// ---------------------------------------------------------------------------
// Rule 2: Age/department mismatch
// ---------------------------------------------------------------------------

/// Patient younger than a configured bound placed in that rule's department.
/// One anomaly per matching rule.
pub fn detect_age_department_mismatch(record: &Record, ctx: &DetectionContext) -> Vec<Anomaly> {
    let age = match record.age {
        Some(age) => i64::from(age),
        None => return Vec::new(),
    };

    ctx.config
        .age_department_mismatch_rules
        .iter()
        .filter(|rule| age < rule.age_bound && record.in_department(&rule.department))
        .map(|rule| Anomaly {
            record_id: record.id.clone(),
            kind: AnomalyKind::AgeDepartmentMismatch,
            severity: Severity::Medium,
            message: format!(
                "{} (age {}) is assigned to {}, which expects patients aged {} or older",
                record.name, age, rule.department, rule.age_bound
            ),
            recommendation: format!(
                "Verify the {} assignment or consult the pediatric service",
                rule.department
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MismatchRule;

    fn record(id: &str, age: Option<u32>, status: RecordStatus, department: &str) -> Record {
        let mut r = Record::new(id, format!("Patient {}", id));
        r.age = age;
        r.status = status;
        r.department = department.to_string();
        r
    }

    #[test]
    fn test_prolonged_critical_after_30_hours() {
        let now = Utc::now();
        let mut r = record("p1", Some(70), RecordStatus::Critical, "Cardiology");
        r.admitted_at = Some(now - chrono::Duration::hours(30));

        let anomalies = detect(&[r], &MonitorConfig::default(), now);

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::ProlongedCritical);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].record_id, "p1");
    }

    #[test]
    fn test_recent_critical_is_not_anomalous() {
        let now = Utc::now();
        let mut r = record("p1", Some(70), RecordStatus::Critical, "Cardiology");
        r.admitted_at = Some(now - chrono::Duration::hours(10));
        assert!(detect(&[r], &MonitorConfig::default(), now).is_empty());

        let no_date = record("p2", Some(70), RecordStatus::Critical, "Cardiology");
        assert!(detect(&[no_date], &MonitorConfig::default(), now).is_empty());
    }

    #[test]
    fn test_pediatric_cardiology_mismatch() {
        let anomalies = detect(
            &[
                record("kid", Some(12), RecordStatus::Active, "cardiology"),
                record("adult", Some(18), RecordStatus::Active, "Cardiology"),
                record("unknown", None, RecordStatus::Active, "Cardiology"),
            ],
            &MonitorConfig::default(),
            Utc::now(),
        );

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].record_id, "kid");
        assert_eq!(anomalies[0].severity, Severity::Medium);
    }

    #[test]
    fn test_record_can_produce_multiple_anomalies() {
        let now = Utc::now();
        let mut r = record("p1", Some(10), RecordStatus::Critical, "Cardiology");
        r.admitted_at = Some(now - chrono::Duration::hours(48));

        let anomalies = detect(&[r], &MonitorConfig::default(), now);
        let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![AnomalyKind::ProlongedCritical, AnomalyKind::AgeDepartmentMismatch]
        );
    }

    #[test]
    fn test_grouped_by_severity_stable_by_input_order() {
        let now = Utc::now();
        let config = MonitorConfig {
            age_department_mismatch_rules: vec![
                MismatchRule { age_bound: 18, department: "Cardiology".to_string() },
                MismatchRule { age_bound: 16, department: "Geriatrics".to_string() },
            ],
            ..MonitorConfig::default()
        };
        let mismatch_a = record("a", Some(5), RecordStatus::Active, "Cardiology");
        let mut critical_b = record("b", Some(50), RecordStatus::Critical, "General");
        critical_b.admitted_at = Some(now - chrono::Duration::hours(25));
        let mismatch_c = record("c", Some(15), RecordStatus::Active, "Geriatrics");
        let mut critical_d = record("d", Some(50), RecordStatus::Critical, "General");
        critical_d.admitted_at = Some(now - chrono::Duration::days(3));

        let anomalies = detect(&[mismatch_a, critical_b, mismatch_c, critical_d], &config, now);
        let order: Vec<&str> = anomalies.iter().map(|a| a.record_id.as_str()).collect();

        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_detect_is_stateless() {
        let now = Utc::now();
        let kid = record("kid", Some(9), RecordStatus::Active, "Cardiology");
        let detector = default_detector();
        let config = MonitorConfig::default();
        let ctx = DetectionContext { now, config: &config };

        assert_eq!(detector.detect(&[kid.clone()], &ctx).len(), 1);
        assert_eq!(detector.detect(&[kid], &ctx).len(), 1);
        assert!(detector.detect(&[], &ctx).is_empty());
        assert_eq!(
            detector.rule_names(),
            vec!["prolonged_critical", "age_department_mismatch"]
        );
    }
}
