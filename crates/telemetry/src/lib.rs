//! Cost tracking and budget enforcement for Stepwise.
//!
//! Every reasoning-engine call is priced from a per-model table and recorded
//! in the [`BudgetGovernor`], which raises tiered alerts and tells the loop
//! whether another call may be made. The [`TraceRecorder`] folds the loop's
//! domain events into per-task traces with step timings.

pub mod governor;
pub mod model;
pub mod pricing;
pub mod trace;

pub use governor::{BudgetGovernor, BudgetLimits};
pub use model::{AlertEvent, AlertLevel, BudgetState, BudgetStatus, CallReport, UsageRecord};
pub use pricing::{FALLBACK_MODEL, ModelPricing, PricingTable};
pub use trace::{CapabilitySpan, DEFAULT_MAX_TRACES, TraceRecord, TraceRecorder, TraceStep};
