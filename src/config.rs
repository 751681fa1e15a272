//! Monitoring configuration.
//!
//! All durations are carried in milliseconds as signed integers so that a
//! negative value reaches `validate()` and is rejected with a readable
//! message instead of failing somewhere inside serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// A (maximum age, department) pair that flags a patient under `age_bound`
/// being placed in `department`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchRule {
    pub age_bound: i64,
    pub department: String,
}

/// Options recognized by `MonitoringService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: i64,
    #[serde(default = "default_cache_freshness_ms")]
    pub cache_freshness_ms: i64,
    #[serde(default = "default_max_visible_notifications")]
    pub max_visible_notifications: usize,
    #[serde(default = "default_notification_auto_hide_ms")]
    pub notification_auto_hide_ms: i64,
    #[serde(default = "default_high_acuity_departments")]
    pub high_acuity_departments: Vec<String>,
    #[serde(default = "default_recent_admission_threshold_ms")]
    pub recent_admission_threshold_ms: i64,
    #[serde(default = "default_age_department_mismatch_rules")]
    pub age_department_mismatch_rules: Vec<MismatchRule>,
    #[serde(default = "default_prolonged_critical_threshold_ms")]
    pub prolonged_critical_threshold_ms: i64,
}

fn default_poll_interval_ms() -> i64 {
    30_000
}

fn default_cache_freshness_ms() -> i64 {
    5 * 60 * 1000
}

fn default_max_visible_notifications() -> usize {
    5
}

fn default_notification_auto_hide_ms() -> i64 {
    5_000
}

fn default_high_acuity_departments() -> Vec<String> {
    vec![
        "Cardiology".to_string(),
        "Neurology".to_string(),
        "Emergency".to_string(),
    ]
}

fn default_recent_admission_threshold_ms() -> i64 {
    24 * 60 * 60 * 1000
}

fn default_age_department_mismatch_rules() -> Vec<MismatchRule> {
    vec![MismatchRule {
        age_bound: 18,
        department: "Cardiology".to_string(),
    }]
}

fn default_prolonged_critical_threshold_ms() -> i64 {
    24 * 60 * 60 * 1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cache_freshness_ms: default_cache_freshness_ms(),
            max_visible_notifications: default_max_visible_notifications(),
            notification_auto_hide_ms: default_notification_auto_hide_ms(),
            high_acuity_departments: default_high_acuity_departments(),
            recent_admission_threshold_ms: default_recent_admission_threshold_ms(),
            age_department_mismatch_rules: default_age_department_mismatch_rules(),
            prolonged_critical_threshold_ms: default_prolonged_critical_threshold_ms(),
        }
    }
}

impl MonitorConfig {
    /// Parse a JSON config document and validate it.
    pub fn from_json(raw: &str) -> Result<Self, MonitorError> {
        let config: MonitorConfig = serde_json::from_str(raw)
            .map_err(|e| MonitorError::Configuration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let positive = [
            ("pollIntervalMs", self.poll_interval_ms),
            ("cacheFreshnessMs", self.cache_freshness_ms),
            ("notificationAutoHideMs", self.notification_auto_hide_ms),
            ("recentAdmissionThresholdMs", self.recent_admission_threshold_ms),
            ("prolongedCriticalThresholdMs", self.prolonged_critical_threshold_ms),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(config_error(format!("{} must be positive, got {}", name, value)));
            }
        }

        if self.max_visible_notifications == 0 {
            return Err(config_error("maxVisibleNotifications must be at least 1"));
        }

        if self.high_acuity_departments.iter().any(|d| d.trim().is_empty()) {
            return Err(config_error("highAcuityDepartments contains a blank department"));
        }

        for rule in &self.age_department_mismatch_rules {
            if rule.age_bound < 0 {
                return Err(config_error(format!(
                    "ageDepartmentMismatchRules: ageBound must not be negative, got {}",
                    rule.age_bound
                )));
            }
            if rule.department.trim().is_empty() {
                return Err(config_error("ageDepartmentMismatchRules contains a blank department"));
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms)
    }

    pub fn cache_freshness(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.cache_freshness_ms)
    }

    pub fn notification_auto_hide(&self) -> Duration {
        millis(self.notification_auto_hide_ms)
    }

    pub fn recent_admission_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.recent_admission_threshold_ms)
    }

    pub fn prolonged_critical_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.prolonged_critical_threshold_ms)
    }

    pub fn is_high_acuity(&self, department: &str) -> bool {
        self.high_acuity_departments
            .iter()
            .any(|d| crate::types::same_department(d, department))
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

fn config_error(message: impl Into<String>) -> MonitorError {
    let message = message.into();
    log::error!("Config: {}", message);
    MonitorError::Configuration(message)
}
