//! `stepwise config`: configuration management commands.

use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use stepwise_config::AppConfig;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Check the configuration and report warnings
    Validate,

    /// Print the default config file path
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(config: &AppConfig, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => println!("{}", toml::to_string_pretty(config)?),
        ConfigAction::Validate => {
            config.validate()?;
            println!("Config parsed successfully");
            let warnings = warnings(config);
            if warnings.is_empty() {
                println!("All checks passed");
            } else {
                for w in &warnings {
                    println!("  warning: {w}");
                }
            }
            println!();
            println!("  Model:      {}", config.agent.model);
            println!("  Max steps:  {}", config.agent.max_steps);
            println!("  Budget:     ${:.4}", config.budget.limit);
            println!("  Timeout:    {}s", config.middleware.default_timeout_secs);
            println!("  Overrides:  {} model prices", config.pricing.len());
        }
        ConfigAction::Path => {
            println!("{}", AppConfig::config_dir().join("config.toml").display());
        }
        ConfigAction::Init { force } => {
            let path = AppConfig::config_dir().join("config.toml");
            init(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

/// Settings that are valid but probably not what the user meant.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut out = Vec::new();
    if config.budget.per_call_limit > config.budget.limit {
        out.push("budget.per_call_limit exceeds budget.limit; per-call warnings will never fire first".into());
    }
    if config.budget.limit == 0.0 {
        out.push("budget.limit is 0; every task will stop before its first call".into());
    }
    if config.agent.max_steps == 0 {
        out.push("agent.max_steps is 0; every task will fail immediately".into());
    }
    if let Some(role) = &config.agent.role
        && role.parse::<stepwise_agent::AgentRole>().is_err()
    {
        out.push(format!("agent.role '{role}' is not a known role"));
    }
    out
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
