//! Wiring: turn an [`AppConfig`] into live runtime components.

use std::time::Duration;
use stepwise_config::AppConfig;
use stepwise_core::capability::RetryPolicy;
use stepwise_telemetry::{BudgetGovernor, BudgetLimits, ModelPricing, PricingTable};
use stepwise_tools::{
    CallLogger, CapabilityRegistry, MemoryStore, MiddlewarePipeline, register_builtins,
};

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool, log_format: &str) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Built-in prices plus `[pricing.<model>]` overrides.
pub fn pricing_table(config: &AppConfig) -> PricingTable {
    let table = PricingTable::with_defaults();
    for (model, price) in &config.pricing {
        table.set(model.clone(), ModelPricing::new(price.input_per_m, price.output_per_m));
    }
    table
}

pub fn budget_limits(config: &AppConfig) -> BudgetLimits {
    BudgetLimits {
        budget_limit: config.budget.limit,
        per_call_limit: config.budget.per_call_limit,
        warning_threshold: config.budget.warning_threshold,
    }
}

pub fn governor(config: &AppConfig) -> BudgetGovernor {
    BudgetGovernor::with_pricing(budget_limits(config), pricing_table(config))
}

pub fn pipeline(config: &AppConfig) -> MiddlewarePipeline {
    let mw = &config.middleware;
    MiddlewarePipeline::new(Duration::from_secs_f64(mw.default_timeout_secs)).with_default_retry(
        RetryPolicy::new(
            mw.max_retries,
            Duration::from_secs_f64(mw.base_delay_secs),
            mw.backoff_factor,
        ),
    )
}

/// A registry with the built-in capabilities and the configured middleware.
pub fn registry(config: &AppConfig) -> (CapabilityRegistry, MemoryStore) {
    let registry = CapabilityRegistry::with_pipeline(pipeline(config))
        .with_call_log(CallLogger::new(config.middleware.max_call_logs));
    let store = MemoryStore::new();
    register_builtins(&registry, &store);
    (registry, store)
}
