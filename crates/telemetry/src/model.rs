//! Data model for usage records, budget alerts, and budget status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Usage ─────────────────────────────────────────────────────────────────

/// One recorded reasoning-engine call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    /// Model identifier the call was priced as.
    pub model: String,
    pub input_units: u64,
    pub output_units: u64,
    /// Cost in USD.
    pub cost: f64,
    /// What the call was for (e.g. `step_3`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ── Alerts ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A budget threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub message: String,
    /// Cumulative usage percent when the alert fired.
    pub usage_percent: f64,
}

// ── Reports ───────────────────────────────────────────────────────────────

/// What `record_call` tells the caller about the call it just recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReport {
    /// Cost of this call.
    pub cost: f64,
    /// Cumulative cost including this call.
    pub total_cost: f64,
    /// `max(0, limit - total)`.
    pub remaining: f64,
    pub usage_percent: f64,
    /// At most one alert per call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertEvent>,
}

/// Coarse health of the budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Normal,
    Warning,
    Exceeded,
}

impl std::fmt::Display for BudgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warning => write!(f, "warning"),
            Self::Exceeded => write!(f, "exceeded"),
        }
    }
}

/// Point-in-time snapshot of the governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub state: BudgetState,
    pub budget_limit: f64,
    pub total_cost: f64,
    pub remaining: f64,
    pub usage_percent: f64,
    pub total_calls: usize,
    pub total_input_units: u64,
    pub total_output_units: u64,
    /// Times `can_proceed` said no.
    pub calls_blocked: u64,
    pub alerts_issued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_level_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&AlertLevel::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(AlertLevel::Warning.to_string(), "WARNING");
    }

    #[test]
    fn usage_record_omits_missing_label() {
        let record = UsageRecord {
            timestamp: Utc::now(),
            model: "gpt-4o-mini".into(),
            input_units: 10,
            output_units: 5,
            cost: 0.0,
            label: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("label").is_none());
        assert_eq!(json["input_units"], 10);
    }

    #[test]
    fn budget_state_display() {
        assert_eq!(BudgetState::Normal.to_string(), "normal");
        assert_eq!(BudgetState::Exceeded.to_string(), "exceeded");
    }
}
