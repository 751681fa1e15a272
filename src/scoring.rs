//! Rule-based patient risk scorer.
//!
//! Sums four fixed factor contributions, clamps the total to 0–100 and maps it
//! to a band. Missing inputs fall back to the lowest contribution of their
//! factor, so scoring never fails.
//!
//! Scoring dimensions:
//! - Age (5–30): >65 → 30, 46–65 → 15, otherwise or unknown → 5
//! - Status (10–50): Critical → 50, Under Treatment → 30, otherwise → 10
//! - Department (10–25): high-acuity → 25, otherwise → 10
//! - Recency (5–20): admitted within the recent window → 20, otherwise or unknown → 5

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::types::{Record, RecordStatus};

const HIGH_BAND_ABOVE: u32 = 70;
const MEDIUM_BAND_ABOVE: u32 = 40;
const MAX_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    /// Strict thresholds: 71 is High, 70 is Medium, 41 is Medium, 40 is Low.
    pub fn from_score(score: u32) -> Self {
        if score > HIGH_BAND_ABOVE {
            RiskBand::High
        } else if score > MEDIUM_BAND_ABOVE {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }
}

/// Per-factor contributions to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactors {
    pub age: u32,
    pub status: u32,
    pub department: u32,
    pub recency: u32,
}

impl RiskFactors {
    pub fn sum(&self) -> u32 {
        self.age + self.status + self.department + self.recency
    }

    /// (factor name, contribution) pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, u32); 4] {
        [
            ("age", self.age),
            ("status", self.status),
            ("department", self.department),
            ("recency", self.recency),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecommendationKind {
    Escalate,
    IncreaseMonitoring,
    DepartmentRoutine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub record_id: String,
    pub score: u32,
    pub band: RiskBand,
    pub factors: RiskFactors,
    pub recommendations: Vec<Recommendation>,
    pub assessed_at: DateTime<Utc>,
}

/// Score `record` as of `now`.
pub fn assess(record: &Record, config: &MonitorConfig, now: DateTime<Utc>) -> RiskAssessment {
    let high_acuity = config.is_high_acuity(&record.department);

    let factors = RiskFactors {
        age: age_factor(record.age),
        status: status_factor(record.status),
        department: if high_acuity { 25 } else { 10 },
        recency: match record.admitted_at {
            Some(admitted) if now - admitted < config.recent_admission_threshold() => 20,
            _ => 5,
        },
    };

    let score = factors.sum().clamp(0, MAX_SCORE);

    // Fixed order, no dedup.
    let mut recommendations = Vec::new();
    if score > HIGH_BAND_ABOVE {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Escalate,
            message: "Escalate to the attending physician for urgent review".to_string(),
        });
    }
    if record.status == RecordStatus::Critical {
        recommendations.push(Recommendation {
            kind: RecommendationKind::IncreaseMonitoring,
            message: "Increase monitoring frequency".to_string(),
        });
    }
    if high_acuity {
        recommendations.push(Recommendation {
            kind: RecommendationKind::DepartmentRoutine,
            message: department_routine(&record.department),
        });
    }

    RiskAssessment {
        record_id: record.id.clone(),
        score,
        band: RiskBand::from_score(score),
        factors,
        recommendations,
        assessed_at: now,
    }
}

fn age_factor(age: Option<u32>) -> u32 {
    match age {
        Some(age) if age > 65 => 30,
        Some(age) if age > 45 => 15,
        _ => 5,
    }
}

fn status_factor(status: RecordStatus) -> u32 {
    match status {
        RecordStatus::Critical => 50,
        RecordStatus::UnderTreatment => 30,
        RecordStatus::Active | RecordStatus::Discharged => 10,
    }
}

fn department_routine(department: &str) -> String {
    let department = department.trim();
    match department.to_ascii_lowercase().as_str() {
        "cardiology" => "Cardiology: schedule routine ECG and cardiac enzyme checks".to_string(),
        "neurology" => "Neurology: perform routine neurological status assessments".to_string(),
        "emergency" => "Emergency: reassess triage level at every shift change".to_string(),
        _ => format!("{}: follow the department's routine monitoring protocol", department),
    }
}
