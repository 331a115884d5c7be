//! Capability types: the abstraction over agent tools.
//!
//! A capability is a versioned, schema-described operation the reasoning
//! engine can ask for. Its body is an [`Invocable`]: either natively
//! suspending (`async`) or blocking. Callers never choose how to run it;
//! the middleware pipeline does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use crate::error::CapabilityError;

/// Named arguments passed to a capability.
pub type CapabilityArgs = serde_json::Map<String, Value>;

/// What a capability body produces.
pub type CapabilityOutput = std::result::Result<Value, CapabilityError>;

/// Default version assigned to schemas that do not name one.
pub const DEFAULT_VERSION: &str = "1.0";

/// Build a `name@version` identity.
pub fn qualified_name(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

// ── Schema ────────────────────────────────────────────────────────────────

/// Primitive parameter types understood by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

impl ParamType {
    /// Whether a JSON value has this primitive type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// One named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
}

/// The descriptor of a capability: name, purpose, parameters, version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    DEFAULT_VERSION.into()
}

impl CapabilitySchema {
    /// A schema with no parameters at the default version.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            required: Vec::new(),
            version: default_version(),
        }
    }

    /// Add a parameter.
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.parameters.insert(
            name,
            ParamSpec {
                param_type,
                description: description.into(),
            },
        );
        self
    }

    /// Set the version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(&self.name, &self.version)
    }

    /// Check arguments against this schema.
    ///
    /// Order: missing required parameters, then unrecognized names, then
    /// primitive type mismatches. The first problem found is reported.
    pub fn validate_args(&self, args: &CapabilityArgs) -> Result<(), CapabilityError> {
        if let Some(missing) = self.required.iter().find(|r| !args.contains_key(*r)) {
            return Err(CapabilityError::Validation(format!(
                "missing required parameter '{missing}'"
            )));
        }

        if let Some(unknown) = args.keys().find(|k| !self.parameters.contains_key(*k)) {
            return Err(CapabilityError::Validation(format!(
                "unrecognized parameter '{unknown}'"
            )));
        }

        for (key, value) in args {
            let Some(spec) = self.parameters.get(key) else {
                continue;
            };
            if !spec.param_type.matches(value) {
                return Err(CapabilityError::Validation(format!(
                    "'{key}' must be a {}, got {}",
                    spec.param_type,
                    json_type_name(value)
                )));
            }
        }

        Ok(())
    }

    /// Render as a function-call descriptor for the reasoning engine.
    pub fn to_function_descriptor(&self) -> FunctionDescriptor {
        FunctionDescriptor {
            kind: "function".into(),
            function: FunctionSpec {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: FunctionParameters {
                    kind: "object".into(),
                    properties: self.parameters.clone(),
                    required: self.required.clone(),
                },
            },
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `{type: "function", function: {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: FunctionParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, ParamSpec>,
    pub required: Vec<String>,
}

// ── Metadata ──────────────────────────────────────────────────────────────

/// Exponential backoff settings for the retry layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    /// Wait after the first failed attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the wait after every further failure.
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_factor,
        }
    }

    /// Wait before the attempt following `attempt` (1-based).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

/// Execution metadata attached to a registered capability.
///
/// `idempotent` defaults to `false`: retrying an operation with side effects
/// must be opted into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityMetadata {
    /// Per-invocation deadline; the registry default applies when unset.
    pub timeout: Option<Duration>,
    /// Whether repeated execution is safe.
    pub idempotent: bool,
    /// Retry through the middleware when set.
    pub retry: Option<RetryPolicy>,
}

impl CapabilityMetadata {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

// ── Invocables ────────────────────────────────────────────────────────────

/// A natively suspending capability body.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, args: CapabilityArgs) -> CapabilityOutput;
}

/// A capability body that blocks the calling thread.
pub trait BlockingCapability: Send + Sync {
    fn invoke(&self, args: CapabilityArgs) -> CapabilityOutput;
}

impl<F> BlockingCapability for F
where
    F: Fn(CapabilityArgs) -> CapabilityOutput + Send + Sync,
{
    fn invoke(&self, args: CapabilityArgs) -> CapabilityOutput {
        self(args)
    }
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> Capability for AsyncFn<F>
where
    F: Fn(CapabilityArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CapabilityOutput> + Send + 'static,
{
    async fn invoke(&self, args: CapabilityArgs) -> CapabilityOutput {
        (self.0)(args).await
    }
}

/// A capability body plus the knowledge of how it must be executed.
#[derive(Clone)]
pub enum Invocable {
    Suspending(Arc<dyn Capability>),
    Blocking(Arc<dyn BlockingCapability>),
}

impl Invocable {
    /// Wrap an async closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(CapabilityArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CapabilityOutput> + Send + 'static,
    {
        Self::Suspending(Arc::new(AsyncFn(f)))
    }

    /// Wrap a blocking closure.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(CapabilityArgs) -> CapabilityOutput + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    /// Wrap a [`BlockingCapability`] implementation.
    pub fn from_blocking(capability: impl BlockingCapability + 'static) -> Self {
        Self::Blocking(Arc::new(capability))
    }

    /// Wrap a suspending [`Capability`] implementation.
    pub fn suspending(capability: impl Capability + 'static) -> Self {
        Self::Suspending(Arc::new(capability))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl std::fmt::Debug for Invocable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspending(_) => f.write_str("Invocable::Suspending"),
            Self::Blocking(_) => f.write_str("Invocable::Blocking"),
        }
    }
}

// ── Boundary result ───────────────────────────────────────────────────────

/// The stable result shape returned for every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
}

impl InvocationResult {
    pub fn ok(result: Value, qualified_name: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            available_names: None,
            qualified_name: Some(qualified_name.into()),
        }
    }

    pub fn failed(error: &CapabilityError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
            available_names: None,
            qualified_name: None,
        }
    }

    pub fn not_found(error: &CapabilityError, available_names: Vec<String>) -> Self {
        Self {
            available_names: Some(available_names),
            ..Self::failed(error)
        }
    }

    /// Text fed back to the reasoning engine as the tool's result.
    pub fn render(&self) -> String {
        match (&self.result, &self.error) {
            (Some(Value::String(s)), _) if self.success => s.clone(),
            (Some(value), _) if self.success => value.to_string(),
            (_, Some(err)) => match &self.available_names {
                Some(names) => format!("Error: {err}. Available capabilities: {}", names.join(", ")),
                None => format!("Error: {err}"),
            },
            _ => String::new(),
        }
    }
}
