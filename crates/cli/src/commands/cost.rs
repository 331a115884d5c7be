//! `stepwise cost`: pricing, estimates, and budget settings.

use crate::runtime;
use clap::Subcommand;
use stepwise_config::AppConfig;
use stepwise_telemetry::{FALLBACK_MODEL, PricingTable};

#[derive(Subcommand)]
pub enum CostAction {
    /// Estimate the cost of one call
    Estimate {
        /// Model identifier (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// Input units (tokens)
        #[arg(short, long)]
        input: u64,

        /// Output units (tokens)
        #[arg(short, long, default_value_t = 0)]
        output: u64,
    },

    /// List model pricing (per 1M units)
    Pricing,

    /// Show the configured budget limits
    Budget,
}

pub fn run(config: &AppConfig, action: CostAction) -> anyhow::Result<()> {
    match action {
        CostAction::Estimate {
            model,
            input,
            output,
        } => {
            let model = model.unwrap_or_else(|| config.agent.model.clone());
            let table = runtime::pricing_table(config);
            print!("{}", render_estimate(&table, &model, input, output));
        }
        CostAction::Pricing => print!("{}", render_pricing(&runtime::pricing_table(config))),
        CostAction::Budget => {
            let limits = runtime::budget_limits(config);
            println!("Budget limits");
            println!("─────────────────────────────────────");
            println!("  Budget limit:      ${:.4}", limits.budget_limit);
            println!("  Per-call limit:    ${:.4}", limits.per_call_limit);
            println!("  Warning threshold: {:.0}%", limits.warning_threshold * 100.0);
        }
    }
    Ok(())
}

fn render_estimate(table: &PricingTable, model: &str, input: u64, output: u64) -> String {
    let cost = table.compute_cost(model, input, output);
    let mut out = format!("Cost estimate for {model}\n");
    if table.get(model).is_none() {
        out.push_str(&format!(
            "  (no exact price for '{model}'; priced by prefix or as {FALLBACK_MODEL})\n"
        ));
    }
    out.push_str(&format!("  Input units:    {input}\n"));
    out.push_str(&format!("  Output units:   {output}\n"));
    out.push_str(&format!("  Estimated cost: ${cost:.6}\n"));
    out
}

fn render_pricing(table: &PricingTable) -> String {
    let models = table.models();
    let mut out = format!("{:<32} {:>10} {:>10}\n", "Model", "Input", "Output");
    for name in &models {
        if let Some(p) = table.get(name) {
            out.push_str(&format!(
                "{:<32} ${:>8.3} ${:>8.3}\n",
                name, p.input_per_m, p.output_per_m
            ));
        }
    }
    out.push_str(&format!("\n  {} models with pricing data\n", models.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_for_known_model() {
        let out = render_estimate(&PricingTable::with_defaults(), "gpt-4o-mini", 1_000_000, 0);
        assert!(out.contains("$0.150000"));
        assert!(!out.contains("no exact price"));
    }

    #[test]
    fn estimate_flags_fallback() {
        let out = render_estimate(&PricingTable::with_defaults(), "mystery-model", 1_000_000, 0);
        assert!(out.contains("no exact price"));
        assert!(out.contains("$0.150000"));
    }

    #[test]
    fn pricing_lists_models() {
        let out = render_pricing(&PricingTable::with_defaults());
        assert!(out.contains("gpt-4o-mini"));
        assert!(out.contains("models with pricing data"));
    }
}
