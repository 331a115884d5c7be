//! `stepwise capabilities`: list the registered capabilities.

use crate::runtime;
use stepwise_config::AppConfig;
use stepwise_tools::CapabilityDescriptor;

pub fn run(config: &AppConfig, versions: bool, json: bool) -> anyhow::Result<()> {
    let (registry, _) = runtime::registry(config);
    let listing = registry.list(versions);

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print!("{}", render_table(&listing));
    }
    Ok(())
}

fn render_table(listing: &[CapabilityDescriptor]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<14} {:<8} {:<8} {:>9} {:>6}  {}\n",
        "Name", "Version", "Default", "Timeout", "Calls", "Description"
    ));
    out.push_str(&format!("{}\n", "─".repeat(72)));
    for d in listing {
        let timeout = d
            .timeout_secs
            .map(|t| format!("{t}s"))
            .unwrap_or_else(|| "default".into());
        out.push_str(&format!(
            "{:<14} {:<8} {:<8} {:>9} {:>6}  {}\n",
            d.name,
            d.version,
            if d.is_default { "yes" } else { "" },
            timeout,
            d.call_count,
            d.description
        ));
    }
    out.push_str(&format!("\n  {} capabilities\n", listing.len()));
    out
}
