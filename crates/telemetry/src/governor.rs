//! Thread-safe budget governor.
//!
//! Records and prices usage, raises tiered alerts, and answers the
//! proceed/deny question before every reasoning-engine call.

use crate::model::*;
use crate::pricing::PricingTable;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Spend ceilings enforced by the governor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Hard cumulative ceiling in USD. Reaching it blocks further calls.
    pub budget_limit: f64,
    /// A single call costing more than this raises a WARNING (never blocks).
    pub per_call_limit: f64,
    /// Fraction of `budget_limit` (0.0–1.0) at which cumulative alerts start.
    pub warning_threshold: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            budget_limit: 1.0,
            per_call_limit: 0.10,
            warning_threshold: 0.80,
        }
    }
}

/// The mutable part, kept behind one lock so appends and the alert
/// evaluation that follows them are atomic.
#[derive(Debug, Default)]
struct Ledger {
    records: Vec<UsageRecord>,
    alerts: Vec<AlertEvent>,
    calls_blocked: u64,
}

impl Ledger {
    fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }
}

/// Tracks cumulative spend and enforces [`BudgetLimits`].
///
/// Share it behind an `Arc` when several loops draw on one budget.
pub struct BudgetGovernor {
    limits: BudgetLimits,
    pricing: PricingTable,
    ledger: Mutex<Ledger>,
}

impl BudgetGovernor {
    /// Create a governor with the built-in pricing table.
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_pricing(limits, PricingTable::with_defaults())
    }

    /// Create a governor with custom pricing.
    pub fn with_pricing(limits: BudgetLimits, pricing: PricingTable) -> Self {
        tracing::info!(
            budget_limit = limits.budget_limit,
            per_call_limit = limits.per_call_limit,
            warning_threshold = limits.warning_threshold,
            "Budget governor initialised"
        );
        Self {
            limits,
            pricing,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Price a call without recording it.
    pub fn calculate_cost(&self, input_units: u64, output_units: u64, model: &str) -> f64 {
        self.pricing.compute_cost(model, input_units, output_units)
    }

    // ── Gate ──────────────────────────────────────────────────────────

    /// Whether another reasoning-engine call may be made.
    ///
    /// False iff cumulative cost ≥ budget limit. Every denial is counted.
    pub fn can_proceed(&self) -> bool {
        let mut ledger = self.ledger();
        let total = ledger.total_cost();
        if total >= self.limits.budget_limit {
            ledger.calls_blocked += 1;
            tracing::error!(
                total_cost = total,
                budget_limit = self.limits.budget_limit,
                "Call blocked: budget exhausted"
            );
            return false;
        }
        true
    }

    /// `total_cost >= budget_limit`, inclusive.
    pub fn is_over_budget(&self) -> bool {
        self.ledger().total_cost() >= self.limits.budget_limit
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// Record one call's usage and evaluate alert tiers.
    ///
    /// Tiers, first match wins: the call's own cost above the per-call
    /// ceiling (WARNING); cumulative usage past the warning threshold with
    /// the hard limit reached (CRITICAL); cumulative usage past the warning
    /// threshold (WARNING). A per-call WARNING therefore masks a CRITICAL
    /// on the same call.
    pub fn record_call(
        &self,
        input_units: u64,
        output_units: u64,
        model: &str,
        label: Option<&str>,
    ) -> CallReport {
        let cost = self.calculate_cost(input_units, output_units, model);
        let mut ledger = self.ledger();

        ledger.records.push(UsageRecord {
            timestamp: Utc::now(),
            model: model.to_string(),
            input_units,
            output_units,
            cost,
            label: label.map(str::to_string),
        });

        let total_cost = ledger.total_cost();
        let usage_percent = usage_percent(total_cost, self.limits.budget_limit);
        let over_threshold = usage_percent >= self.limits.warning_threshold * 100.0;

        let alert = if cost > self.limits.per_call_limit {
            let message = format!(
                "Per-call limit exceeded: ${cost:.6} > ${:.6} (model={model}, in={input_units}, out={output_units})",
                self.limits.per_call_limit
            );
            tracing::warn!(cost, per_call_limit = self.limits.per_call_limit, %model, "{message}");
            Some((AlertLevel::Warning, message))
        } else if over_threshold && total_cost >= self.limits.budget_limit {
            let message = format!(
                "Budget exceeded: ${total_cost:.6} >= ${:.6}",
                self.limits.budget_limit
            );
            tracing::error!(total_cost, budget_limit = self.limits.budget_limit, "{message}");
            Some((AlertLevel::Critical, message))
        } else if over_threshold {
            let message = format!(
                "Budget warning: {usage_percent:.1}% used (${total_cost:.6} / ${:.6})",
                self.limits.budget_limit
            );
            tracing::warn!(usage_percent, total_cost, "{message}");
            Some((AlertLevel::Warning, message))
        } else {
            None
        };

        let alert = alert.map(|(level, message)| {
            let event = AlertEvent {
                timestamp: Utc::now(),
                level,
                message,
                usage_percent,
            };
            ledger.alerts.push(event.clone());
            event
        });

        tracing::debug!(cost, total_cost, usage_percent, %model, "Usage recorded");

        CallReport {
            cost,
            total_cost,
            remaining: remaining(total_cost, self.limits.budget_limit),
            usage_percent,
            alert,
        }
    }

    /// Clear records, alerts, and counters for a new session. Limits stay.
    pub fn reset(&self) {
        *self.ledger() = Ledger::default();
        tracing::info!("Budget governor reset");
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn total_cost(&self) -> f64 {
        self.ledger().total_cost()
    }

    pub fn remaining_budget(&self) -> f64 {
        remaining(self.total_cost(), self.limits.budget_limit)
    }

    pub fn usage_percent(&self) -> f64 {
        usage_percent(self.total_cost(), self.limits.budget_limit)
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.ledger().records.clone()
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.ledger().alerts.clone()
    }

    /// Snapshot of the governor.
    pub fn status(&self) -> BudgetStatus {
        let ledger = self.ledger();
        let total_cost = ledger.total_cost();
        let usage_percent = usage_percent(total_cost, self.limits.budget_limit);
        let state = if total_cost >= self.limits.budget_limit {
            BudgetState::Exceeded
        } else if usage_percent >= self.limits.warning_threshold * 100.0 {
            BudgetState::Warning
        } else {
            BudgetState::Normal
        };

        BudgetStatus {
            state,
            budget_limit: self.limits.budget_limit,
            total_cost,
            remaining: remaining(total_cost, self.limits.budget_limit),
            usage_percent,
            total_calls: ledger.records.len(),
            total_input_units: ledger.records.iter().map(|r| r.input_units).sum(),
            total_output_units: ledger.records.iter().map(|r| r.output_units).sum(),
            calls_blocked: ledger.calls_blocked,
            alerts_issued: ledger.alerts.len(),
        }
    }

    /// Human-readable summary, including the three most expensive calls and
    /// the last five alerts.
    pub fn report(&self) -> String {
        let status = self.status();
        let mut lines = vec![
            format!("Budget status: {}", status.state),
            format!("  Calls:          {}", status.total_calls),
            format!("  Input units:    {}", status.total_input_units),
            format!("  Output units:   {}", status.total_output_units),
            format!("  Total cost:     ${:.6}", status.total_cost),
            format!("  Budget limit:   ${:.6}", status.budget_limit),
            format!("  Remaining:      ${:.6}", status.remaining),
            format!("  Usage:          {:.1}%", status.usage_percent),
            format!("  Calls blocked:  {}", status.calls_blocked),
        ];

        let mut records = self.records();
        if !records.is_empty() {
            records.sort_by(|a, b| b.cost.total_cmp(&a.cost));
            lines.push("Most expensive calls:".into());
            for r in records.iter().take(3) {
                let label = r.label.as_deref().map(|l| format!(" ({l})")).unwrap_or_default();
                lines.push(format!(
                    "  ${:.6} | {} | in:{} out:{}{label}",
                    r.cost, r.model, r.input_units, r.output_units
                ));
            }
        }

        let alerts = self.alerts();
        if !alerts.is_empty() {
            lines.push("Recent alerts:".into());
            for alert in alerts.iter().rev().take(5).rev() {
                lines.push(format!(
                    "  [{}] {} {}",
                    alert.level,
                    alert.timestamp.format("%H:%M:%S"),
                    alert.message
                ));
            }
        }

        lines.join("\n")
    }
}

impl Default for BudgetGovernor {
    fn default() -> Self {
        Self::new(BudgetLimits::default())
    }
}

/// `total / limit × 100`, or 100 when the limit is not positive.
pub fn usage_percent(total_cost: f64, budget_limit: f64) -> f64 {
    if budget_limit <= 0.0 {
        return 100.0;
    }
    total_cost / budget_limit * 100.0
}

fn remaining(total_cost: f64, budget_limit: f64) -> f64 {
    (budget_limit - total_cost).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ModelPricing;
    use std::sync::Arc;

    /// $1 per million input units, output free: unit counts map to exact
    /// binary fractions of a dollar.
    fn governor(budget_limit: f64, per_call_limit: f64, warning_threshold: f64) -> BudgetGovernor {
        let pricing = PricingTable::empty().with_fallback("flat");
        pricing.set("flat", ModelPricing::new(1.0, 0.0));
        BudgetGovernor::with_pricing(
            BudgetLimits {
                budget_limit,
                per_call_limit,
                warning_threshold,
            },
            pricing,
        )
    }

    #[test]
    fn calculate_cost_uses_price_table() {
        let gov = BudgetGovernor::default();
        assert_eq!(gov.calculate_cost(1_000_000, 0, "gpt-4o-mini"), 0.15);
        assert!(gov.records().is_empty());
    }

    #[test]
    fn tiers_escalate_from_quiet_to_warning_to_critical() {
        let gov = governor(1.0, 0.6, 0.8);

        let r = gov.record_call(500_000, 0, "flat", Some("step_1"));
        assert_eq!(r.cost, 0.5);
        assert!(r.alert.is_none());

        let r = gov.record_call(250_000, 0, "flat", Some("step_2"));
        assert_eq!(r.total_cost, 0.75);
        assert!(r.alert.is_none());

        let r = gov.record_call(125_000, 0, "flat", Some("step_3"));
        assert_eq!(r.usage_percent, 87.5);
        assert_eq!(r.alert.as_ref().map(|a| a.level), Some(AlertLevel::Warning));
        assert!(gov.can_proceed());

        let r = gov.record_call(125_000, 0, "flat", None);
        assert_eq!(r.total_cost, 1.0);
        assert_eq!(r.remaining, 0.0);
        assert_eq!(r.alert.as_ref().map(|a| a.level), Some(AlertLevel::Critical));
        assert!(!gov.can_proceed());
        assert_eq!(gov.alerts().len(), 2);
    }

    #[test]
    fn per_call_warning_masks_critical() {
        let gov = governor(1.0, 0.6, 0.8);
        let r = gov.record_call(1_000_000, 0, "flat", None);
        let alert = r.alert.unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);
        assert!(alert.message.contains("Per-call"));
        assert!(gov.is_over_budget());
        assert!(!gov.can_proceed());
    }

    #[test]
    fn boundary_is_inclusive() {
        let gov = governor(0.5, 10.0, 0.8);
        gov.record_call(500_000, 0, "flat", None);
        assert_eq!(gov.total_cost(), 0.5);
        assert!(gov.is_over_budget());
        assert!(!gov.can_proceed());
    }

    #[test]
    fn remaining_never_negative() {
        let gov = governor(0.25, 10.0, 0.8);
        gov.record_call(500_000, 0, "flat", None);
        assert_eq!(gov.remaining_budget(), 0.0);
        assert_eq!(gov.usage_percent(), 200.0);
    }

    #[test]
    fn zero_budget_blocks_after_any_call() {
        let gov = governor(0.0, 0.1, 0.8);
        let r = gov.record_call(0, 0, "flat", None);
        assert_eq!(r.usage_percent, 100.0);
        assert!(!gov.can_proceed());
        assert_eq!(gov.status().calls_blocked, 1);
        assert_eq!(gov.status().state, BudgetState::Exceeded);
    }

    #[test]
    fn reset_clears_ledger_but_keeps_limits() {
        let gov = governor(1.0, 0.6, 0.8);
        gov.record_call(1_000_000, 0, "flat", None);
        assert!(!gov.can_proceed());

        gov.reset();
        assert!(gov.records().is_empty());
        assert!(gov.alerts().is_empty());
        assert_eq!(gov.status().calls_blocked, 0);
        assert_eq!(gov.limits().budget_limit, 1.0);
        assert!(gov.can_proceed());
    }

    #[test]
    fn report_lists_most_expensive_calls() {
        let gov = governor(10.0, 5.0, 0.8);
        gov.record_call(125_000, 0, "flat", Some("small"));
        gov.record_call(2_000_000, 0, "flat", Some("big"));
        let report = gov.report();
        assert!(report.contains("Most expensive calls"));
        let big = report.find("(big)").unwrap();
        let small = report.find("(small)").unwrap();
        assert!(big < small);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let gov = Arc::new(governor(1_000.0, 1_000.0, 0.99));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gov = Arc::clone(&gov);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        gov.record_call(125_000, 0, "flat", None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gov.records().len(), 200);
        assert_eq!(gov.total_cost(), 25.0);
    }
}
