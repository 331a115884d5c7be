//! Stepwise CLI: the main entry point.
//!
//! Commands:
//! - `capabilities`: list registered capabilities
//! - `cost`: estimate costs, show pricing and budget settings
//! - `config`: show, validate, or initialise configuration
//! - `run`: dry-run a task against a scripted reasoning engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stepwise_config::AppConfig;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise: budget-governed agent execution runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.stepwise/config.toml
    #[arg(long, global = true, env = "STEPWISE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered capabilities
    Capabilities {
        /// Show every version, not only defaults
        #[arg(long)]
        versions: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Cost estimation and budget settings
    Cost {
        #[command(subcommand)]
        action: commands::cost::CostAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },

    /// Run a task against a scripted reasoning engine
    Run {
        /// JSON script of engine responses
        #[arg(short, long)]
        script: PathBuf,

        /// Task text given to the loop
        #[arg(short, long, default_value = "Dry run")]
        task: String,

        /// Override the configured step limit
        #[arg(long)]
        max_steps: Option<u32>,

        /// Adopt a role (planner, researcher, critic, synthesizer)
        #[arg(long)]
        role: Option<String>,

        /// Print the final task state as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };

    runtime::init_tracing(cli.verbose, &config.telemetry.log_format);

    match cli.command {
        Commands::Capabilities { versions, json } => {
            commands::capabilities::run(&config, versions, json)?
        }
        Commands::Cost { action } => commands::cost::run(&config, action)?,
        Commands::Config { action } => commands::config_cmd::run(&config, action)?,
        Commands::Run {
            script,
            task,
            max_steps,
            role,
            json,
        } => {
            let options = commands::run::RunOptions {
                script,
                task,
                max_steps,
                role,
                json,
            };
            commands::run::run(&config, options).await?
        }
    }

    Ok(())
}
