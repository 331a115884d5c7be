//! Configuration loading, validation, and management for Stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Spend ceilings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Default timeout and retry settings for capabilities
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Logging and event settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Custom per-million-unit pricing (model name → pricing)
    #[serde(default)]
    pub pricing: BTreeMap<String, PricingOverrideConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier sent to the reasoning engine and used for pricing
    #[serde(default = "default_model")]
    pub model: String,

    /// Step ceiling for one task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Optional role ("planner", "researcher", "critic", "synthesizer")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_steps() -> u32 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_steps: default_max_steps(),
            role: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard cumulative ceiling in USD
    #[serde(default = "default_budget_limit")]
    pub limit: f64,

    /// Single-call warning ceiling in USD
    #[serde(default = "default_per_call_limit")]
    pub per_call_limit: f64,

    /// Fraction of `limit` at which alerts start (0.0–1.0)
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
}

fn default_budget_limit() -> f64 {
    1.0
}
fn default_per_call_limit() -> f64 {
    0.10
}
fn default_warning_threshold() -> f64 {
    0.80
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit: default_budget_limit(),
            per_call_limit: default_per_call_limit(),
            warning_threshold: default_warning_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Timeout applied when a capability declares none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Capability calls kept in the registry's call log; 0 disables it
    #[serde(default = "default_max_call_logs")]
    pub max_call_logs: usize,
}

fn default_timeout_secs() -> f64 {
    30.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_secs() -> f64 {
    1.0
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_call_logs() -> usize {
    100
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            backoff_factor: default_backoff_factor(),
            max_call_logs: default_max_call_logs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Capacity of the domain event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Task traces kept by the trace recorder
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
}

fn default_log_format() -> String {
    "pretty".into()
}
fn default_event_capacity() -> usize {
    256
}
fn default_max_traces() -> usize {
    50
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            event_capacity: default_event_capacity(),
            max_traces: default_max_traces(),
        }
    }
}

/// Custom per-million-unit pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input units in USD
    pub input_per_m: f64,
    /// Price per 1M output units in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml).
    ///
    /// Environment variables override file values:
    /// - `STEPWISE_MODEL`
    /// - `STEPWISE_BUDGET_LIMIT`
    /// - `STEPWISE_MAX_STEPS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Apply `STEPWISE_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("STEPWISE_MODEL") {
            self.agent.model = model;
        }
        if let Some(raw) = lookup("STEPWISE_BUDGET_LIMIT") {
            self.budget.limit = parse_env("STEPWISE_BUDGET_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("STEPWISE_MAX_STEPS") {
            self.agent.max_steps = parse_env("STEPWISE_MAX_STEPS", &raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("agent.model must not be empty".into()));
        }

        non_negative("budget.limit", self.budget.limit)?;
        non_negative("budget.per_call_limit", self.budget.per_call_limit)?;

        if !(0.0..=1.0).contains(&self.budget.warning_threshold) {
            return Err(ConfigError::ValidationError(
                "budget.warning_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        let mw = &self.middleware;
        seconds("middleware.default_timeout_secs", mw.default_timeout_secs)?;
        if mw.default_timeout_secs == 0.0 {
            return Err(ConfigError::ValidationError(
                "middleware.default_timeout_secs must be > 0".into(),
            ));
        }
        seconds("middleware.base_delay_secs", mw.base_delay_secs)?;
        if !mw.backoff_factor.is_finite() || mw.backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "middleware.backoff_factor must be a finite number >= 1, got {}",
                mw.backoff_factor
            )));
        }

        if !matches!(self.telemetry.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "telemetry.log_format must be \"pretty\" or \"json\", got \"{}\"",
                self.telemetry.log_format
            )));
        }

        for (model, price) in &self.pricing {
            non_negative(&format!("pricing.{model}.input_per_m"), price.input_per_m)?;
            non_negative(&format!("pricing.{model}.output_per_m"), price.output_per_m)?;
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// NaN and infinities fail every range check, so reject them explicitly.
fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{field} must be a finite number >= 0, got {value}"
        )))
    }
}

/// A non-negative value that converts to a `Duration`.
fn seconds(field: &str, value: f64) -> Result<(), ConfigError> {
    non_negative(field, value)?;
    Duration::try_from_secs_f64(value).map(|_| ()).map_err(|_| {
        ConfigError::ValidationError(format!("{field} is too large: {value}"))
    })
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.model, "gpt-4o-mini");
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.budget.limit, 1.0);
        assert_eq!(config.middleware.default_timeout_secs, 30.0);
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = AppConfig::default();
        config.pricing.insert(
            "local/llama".into(),
            PricingOverrideConfig {
                input_per_m: 0.0,
                output_per_m: 0.0,
            },
        );
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn log_bounds_default_and_parse() {
        let config: AppConfig =
            toml::from_str("[middleware]\nmax_call_logs = 5\n[telemetry]\nmax_traces = 2").unwrap();
        assert_eq!(config.middleware.max_call_logs, 5);
        assert_eq!(config.telemetry.max_traces, 2);
        assert_eq!(AppConfig::default().middleware.max_call_logs, 100);
        assert_eq!(AppConfig::default().telemetry.max_traces, 50);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
max_steps = 4
role = "critic"

[budget]
limit = 0.5

[pricing."acme/model"]
input_per_m = 1.0
output_per_m = 2.0
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.max_steps, 4);
        assert_eq!(config.agent.role.as_deref(), Some("critic"));
        assert_eq!(config.agent.model, "gpt-4o-mini");
        assert_eq!(config.budget.limit, 0.5);
        assert_eq!(config.budget.warning_threshold, 0.80);
        assert_eq!(config.pricing["acme/model"].output_per_m, 2.0);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[budget\nlimit = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_threshold_rejected() {
        let config = AppConfig {
            budget: BudgetConfig {
                warning_threshold: 1.5,
                ..BudgetConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_finite_numbers_rejected() {
        let cases = [
            "[budget]\nlimit = nan",
            "[budget]\nper_call_limit = inf",
            "[budget]\nwarning_threshold = nan",
            "[middleware]\nbase_delay_secs = nan",
            "[middleware]\ndefault_timeout_secs = inf",
            "[middleware]\nbackoff_factor = inf",
            "[middleware]\nbackoff_factor = nan",
            "[pricing.\"acme/model\"]\ninput_per_m = nan\noutput_per_m = 1.0",
            "[pricing.\"acme/model\"]\ninput_per_m = 1.0\noutput_per_m = -inf",
        ];
        for raw in cases {
            let config: AppConfig = toml::from_str(raw).unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn oversized_delay_rejected() {
        let config: AppConfig = toml::from_str("[middleware]\nbase_delay_secs = 1e300").unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("too large"));
    }

    #[test]
    fn nan_budget_from_env_rejected() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| (key == "STEPWISE_BUDGET_LIMIT").then(|| "NaN".to_string()))
            .unwrap();
        assert!(config.budget.limit.is_nan());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let mut config = AppConfig::default();
        config.telemetry.log_format = "xml".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("STEPWISE_MODEL", "gpt-4o"),
            ("STEPWISE_BUDGET_LIMIT", "2.5"),
            ("STEPWISE_MAX_STEPS", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.agent.model, "gpt-4o");
        assert_eq!(config.budget.limit, 2.5);
        assert_eq!(config.agent.max_steps, 7);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|k| (k == "STEPWISE_MAX_STEPS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == "STEPWISE_MAX_STEPS"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[budget]"));
        assert!(toml_str.contains("gpt-4o-mini"));
    }
}
