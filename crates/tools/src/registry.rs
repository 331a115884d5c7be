//! Versioned capability catalog.
//!
//! Capabilities are keyed by name, then by version. Each name has exactly one
//! default version once anything is registered under it. Invocation resolves
//! an entry, validates arguments against its schema, and executes through the
//! [`MiddlewarePipeline`]. Per-entry counters are atomics and the catalog sits
//! behind a lock, so one registry can be shared by several loops.

use crate::call_log::{CallLog, CallLogger};
use crate::middleware::MiddlewarePipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use stepwise_core::capability::{
    CapabilityArgs, CapabilityMetadata, CapabilitySchema, FunctionDescriptor, Invocable,
    InvocationResult,
};
use stepwise_core::error::CapabilityError;

/// One registered (name, version) pair.
#[derive(Debug)]
pub struct CapabilityEntry {
    pub schema: CapabilitySchema,
    pub invocable: Invocable,
    pub metadata: CapabilityMetadata,
    pub registered_at: DateTime<Utc>,
    call_count: AtomicU64,
    error_count: AtomicU64,
}

impl CapabilityEntry {
    fn new(schema: CapabilitySchema, invocable: Invocable, metadata: CapabilityMetadata) -> Self {
        Self {
            schema,
            invocable,
            metadata,
            registered_at: Utc::now(),
            call_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn version(&self) -> &str {
        &self.schema.version
    }

    pub fn qualified_name(&self) -> String {
        self.schema.qualified_name()
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Percentage of calls that succeeded; 100 before the first call.
    pub fn success_rate(&self) -> f64 {
        success_rate(self.call_count(), self.error_count())
    }

    fn record_call(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }
}

fn success_rate(calls: u64, errors: u64) -> f64 {
    if calls == 0 {
        return 100.0;
    }
    (calls - errors.min(calls)) as f64 / calls as f64 * 100.0
}

/// Listing row for one capability version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub is_default: bool,
    pub idempotent: bool,
    pub timeout_secs: Option<f64>,
    pub call_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub registered_at: DateTime<Utc>,
    /// Every registered version of this name. Filled only in default-only
    /// listings, where the other versions have no row of their own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions_available: Vec<String>,
}

/// Aggregate counters across the whole catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Distinct capability names.
    pub capabilities: usize,
    /// Registered (name, version) pairs.
    pub versions: usize,
    pub total_calls: u64,
    pub total_errors: u64,
    pub success_rate: f64,
}

#[derive(Debug)]
struct VersionSet {
    entries: BTreeMap<String, Arc<CapabilityEntry>>,
    default: String,
}

impl VersionSet {
    fn default_entry(&self) -> Option<&Arc<CapabilityEntry>> {
        self.entries.get(&self.default)
    }
}

/// Registry of versioned capabilities.
pub struct CapabilityRegistry {
    catalog: RwLock<BTreeMap<String, VersionSet>>,
    pipeline: MiddlewarePipeline,
    call_log: CallLogger,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::with_pipeline(MiddlewarePipeline::default())
    }

    /// Use a pipeline with a custom default timeout.
    pub fn with_pipeline(pipeline: MiddlewarePipeline) -> Self {
        Self {
            catalog: RwLock::new(BTreeMap::new()),
            pipeline,
            call_log: CallLogger::default(),
        }
    }

    /// Replace the call log, e.g. to change its bound.
    pub fn with_call_log(mut self, call_log: CallLogger) -> Self {
        self.call_log = call_log;
        self
    }

    pub fn pipeline(&self) -> &MiddlewarePipeline {
        &self.pipeline
    }

    /// Every resolved invocation, most recent last.
    pub fn call_log(&self) -> &CallLogger {
        &self.call_log
    }

    /// Insert or overwrite the entry for `(schema.name, schema.version)`.
    ///
    /// `is_default` repoints the name's default to this version. The first
    /// version registered under a name becomes its default regardless.
    pub fn register(
        &self,
        schema: CapabilitySchema,
        invocable: Invocable,
        metadata: CapabilityMetadata,
        is_default: bool,
    ) {
        let name = schema.name.clone();
        let version = schema.version.clone();
        let entry = Arc::new(CapabilityEntry::new(schema, invocable, metadata));

        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let set = catalog.entry(name.clone()).or_insert_with(|| VersionSet {
            entries: BTreeMap::new(),
            default: version.clone(),
        });
        if set.entries.insert(version.clone(), entry).is_some() {
            tracing::debug!(%name, %version, "Capability entry replaced");
        }
        if is_default {
            set.default = version.clone();
        }

        tracing::info!(%name, %version, default = %set.default, "Capability registered");
    }

    /// Find the entry for `name`, at `version` or at the default version.
    pub fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Arc<CapabilityEntry>, CapabilityError> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let set = catalog.get(name);
        let entry = match version {
            Some(v) => set.and_then(|s| s.entries.get(v)),
            None => set.and_then(VersionSet::default_entry),
        };
        entry.cloned().ok_or_else(|| CapabilityError::NotFound {
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Describe the default of every name, or every version when
    /// `include_versions` is set. Sorted by name, then version.
    pub fn list(&self, include_versions: bool) -> Vec<CapabilityDescriptor> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        for set in catalog.values() {
            if include_versions {
                for entry in set.entries.values() {
                    out.push(describe(entry, entry.version() == set.default, Vec::new()));
                }
            } else if let Some(entry) = set.default_entry() {
                out.push(describe(entry, true, set.entries.keys().cloned().collect()));
            }
        }
        out
    }

    /// Function-call descriptors for every default entry, for the reasoning
    /// engine's tool list.
    pub fn function_descriptors(&self) -> Vec<FunctionDescriptor> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        catalog
            .values()
            .filter_map(VersionSet::default_entry)
            .map(|entry| entry.schema.to_function_descriptor())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let entries = catalog.values().flat_map(|s| s.entries.values());
        let (mut versions, mut total_calls, mut total_errors) = (0, 0, 0);
        for entry in entries {
            versions += 1;
            total_calls += entry.call_count();
            total_errors += entry.error_count();
        }
        RegistryStats {
            capabilities: catalog.len(),
            versions,
            total_calls,
            total_errors,
            success_rate: success_rate(total_calls, total_errors),
        }
    }

    /// Resolve, validate, and execute a capability.
    ///
    /// Never fails: every problem is folded into the returned
    /// [`InvocationResult`]. An unknown name reports the available names.
    pub async fn invoke(
        &self,
        name: &str,
        args: CapabilityArgs,
        version: Option<&str>,
    ) -> InvocationResult {
        let entry = match self.resolve(name, version) {
            Ok(entry) => entry,
            Err(e) => return self.not_found(e),
        };
        entry.record_call();
        self.execute(&entry, args).await
    }

    /// Like [`invoke`](Self::invoke), with arguments as a raw JSON string.
    ///
    /// An empty string means no arguments. Anything that is not a JSON object
    /// is a validation failure of the resolved entry.
    pub async fn invoke_json(
        &self,
        name: &str,
        raw_args: &str,
        version: Option<&str>,
    ) -> InvocationResult {
        let entry = match self.resolve(name, version) {
            Ok(entry) => entry,
            Err(e) => return self.not_found(e),
        };
        entry.record_call();

        let args = if raw_args.trim().is_empty() {
            CapabilityArgs::new()
        } else {
            match serde_json::from_str::<CapabilityArgs>(raw_args) {
                Ok(args) => args,
                Err(e) => {
                    let error = CapabilityError::Validation(format!(
                        "arguments must be a JSON object: {e}"
                    ));
                    let result = self.fail(&entry, error);
                    self.log_call(&entry, CapabilityArgs::new(), &result, 0);
                    return result;
                }
            }
        };
        self.execute(&entry, args).await
    }

    async fn execute(&self, entry: &CapabilityEntry, args: CapabilityArgs) -> InvocationResult {
        let logged_args = args.clone();
        let started = Instant::now();
        let result = self.run_entry(entry, args).await;
        self.log_call(entry, logged_args, &result, elapsed_ms(started.elapsed()));
        result
    }

    async fn run_entry(&self, entry: &CapabilityEntry, args: CapabilityArgs) -> InvocationResult {
        if let Err(e) = entry.schema.validate_args(&args) {
            return self.fail(entry, e);
        }

        let started = Instant::now();
        let timeout = self.pipeline.timeout_for(entry.metadata.timeout);
        let retry = self
            .pipeline
            .retry_for(entry.metadata.retry.as_ref(), entry.metadata.idempotent);
        let output = match retry {
            Some(policy) => {
                self.pipeline
                    .with_retry(
                        &entry.invocable,
                        args,
                        policy,
                        entry.metadata.idempotent,
                        timeout,
                    )
                    .await
                    .result
            }
            None => self.pipeline.with_timeout(&entry.invocable, args, timeout).await,
        };
        let duration_ms = elapsed_ms(started.elapsed());

        match output {
            Ok(value) => {
                tracing::debug!(capability = %entry.qualified_name(), duration_ms, "Capability succeeded");
                InvocationResult::ok(value, entry.qualified_name())
            }
            Err(e) => self.fail(entry, e),
        }
    }

    fn log_call(
        &self,
        entry: &CapabilityEntry,
        arguments: CapabilityArgs,
        result: &InvocationResult,
        duration_ms: u64,
    ) {
        self.call_log.record(CallLog {
            timestamp: Utc::now(),
            name: entry.name().to_string(),
            qualified_name: entry.qualified_name(),
            arguments,
            success: result.success,
            error: result.error.clone(),
            duration_ms,
        });
    }

    fn fail(&self, entry: &CapabilityEntry, error: CapabilityError) -> InvocationResult {
        entry.record_error();
        tracing::warn!(capability = %entry.qualified_name(), error = %error, "Capability failed");
        InvocationResult {
            qualified_name: Some(entry.qualified_name()),
            ..InvocationResult::failed(&error)
        }
    }

    fn not_found(&self, error: CapabilityError) -> InvocationResult {
        tracing::warn!(error = %error, "Capability lookup failed");
        InvocationResult::not_found(&error, self.names())
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(
    entry: &CapabilityEntry,
    is_default: bool,
    versions_available: Vec<String>,
) -> CapabilityDescriptor {
    CapabilityDescriptor {
        name: entry.name().to_string(),
        version: entry.version().to_string(),
        description: entry.schema.description.clone(),
        is_default,
        idempotent: entry.metadata.idempotent,
        timeout_secs: entry.metadata.timeout.map(|t| t.as_secs_f64()),
        call_count: entry.call_count(),
        error_count: entry.error_count(),
        success_rate: entry.success_rate(),
        registered_at: entry.registered_at,
        versions_available,
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicU32;
    use stepwise_core::capability::{ParamType, RetryPolicy};

    fn args(value: Value) -> CapabilityArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("args must be an object"),
        }
    }

    fn echo_schema(version: &str) -> CapabilitySchema {
        CapabilitySchema::new("echo", format!("Echo v{version}"))
            .param("message", ParamType::String, "Text to echo", true)
            .version(version)
    }

    fn echo_with_prefix(prefix: &'static str) -> Invocable {
        Invocable::blocking(move |args| {
            let msg = args.get("message").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(format!("{prefix}{msg}")))
        })
    }

    #[tokio::test]
    async fn invoke_default_version() {
        let registry = CapabilityRegistry::new();
        registry.register(
            echo_schema("1.0"),
            echo_with_prefix(""),
            CapabilityMetadata::default(),
            true,
        );

        let result = registry.invoke("echo", args(json!({"message": "hi"})), None).await;
        assert!(result.success);
        assert_eq!(result.result, Some(json!("hi")));
        assert_eq!(result.qualified_name.as_deref(), Some("echo@1.0"));
    }

    #[tokio::test]
    async fn default_repoints_and_explicit_version_still_resolves() {
        let registry = CapabilityRegistry::new();
        registry.register(echo_schema("1.0"), echo_with_prefix("v1:"), CapabilityMetadata::default(), true);
        registry.register(echo_schema("2.0"), echo_with_prefix("v2:"), CapabilityMetadata::default(), true);

        let latest = registry.invoke("echo", args(json!({"message": "x"})), None).await;
        assert_eq!(latest.result, Some(json!("v2:x")));
        assert_eq!(latest.qualified_name.as_deref(), Some("echo@2.0"));

        let pinned = registry
            .invoke("echo", args(json!({"message": "x"})), Some("1.0"))
            .await;
        assert_eq!(pinned.result, Some(json!("v1:x")));
    }

    #[test]
    fn first_version_is_default_even_without_flag() {
        let registry = CapabilityRegistry::new();
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), false);
        registry.register(echo_schema("2.0"), echo_with_prefix(""), CapabilityMetadata::default(), false);

        assert_eq!(registry.resolve("echo", None).unwrap().version(), "1.0");
        let listing = registry.list(true);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing.iter().filter(|d| d.is_default).count(), 1);
    }

    #[tokio::test]
    async fn unknown_name_lists_available() {
        let registry = CapabilityRegistry::new();
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);

        let result = registry.invoke("nonexistent", CapabilityArgs::new(), None).await;
        assert!(!result.success);
        assert_eq!(result.available_names, Some(vec!["echo".to_string()]));
        assert!(result.render().contains("Available capabilities: echo"));
        assert_eq!(registry.stats().total_calls, 0);
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let registry = CapabilityRegistry::new();
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);
        let err = registry.resolve("echo", Some("9.9")).unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound { version: Some(ref v), .. } if v == "9.9"));
    }

    #[tokio::test]
    async fn validation_failure_skips_body_and_counts() {
        let registry = CapabilityRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            echo_schema("1.0"),
            Invocable::blocking(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
            CapabilityMetadata::default(),
            true,
        );

        let missing = registry.invoke("echo", CapabilityArgs::new(), None).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("missing required parameter 'message'"));

        let wrong_type = registry.invoke("echo", args(json!({"message": 5})), None).await;
        assert!(!wrong_type.success);

        let extra = registry
            .invoke("echo", args(json!({"message": "a", "loud": true})), None)
            .await;
        assert!(extra.error.unwrap().contains("unrecognized parameter 'loud'"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let entry = registry.resolve("echo", None).unwrap();
        assert_eq!(entry.call_count(), 3);
        assert_eq!(entry.error_count(), 3);
        assert_eq!(entry.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn malformed_json_arguments_are_a_validation_failure() {
        let registry = CapabilityRegistry::new();
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);

        let bad = registry.invoke_json("echo", "{not json", None).await;
        assert!(!bad.success);
        assert!(bad.error.unwrap().starts_with("Invalid arguments"));

        let good = registry.invoke_json("echo", r#"{"message":"ok"}"#, None).await;
        assert_eq!(good.result, Some(json!("ok")));

        let entry = registry.resolve("echo", None).unwrap();
        assert_eq!((entry.call_count(), entry.error_count()), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn declared_timeout_applies_and_counts_as_error() {
        let registry = CapabilityRegistry::new();
        registry.register(
            CapabilitySchema::new("slow", "Never finishes in time"),
            Invocable::from_async(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, CapabilityError>(Value::Null)
            }),
            CapabilityMetadata::default().with_timeout(Duration::from_secs(2)),
            true,
        );

        let result = registry.invoke("slow", CapabilityArgs::new(), None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Timed out after 2s"));
        assert_eq!(result.qualified_name.as_deref(), Some("slow@1.0"));
        assert_eq!(registry.resolve("slow", None).unwrap().error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_counts_one_call() {
        let registry = CapabilityRegistry::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        registry.register(
            CapabilitySchema::new("flaky", "Fails twice"),
            Invocable::from_async(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CapabilityError::execution("transient"))
                    } else {
                        Ok(json!("done"))
                    }
                }
            }),
            CapabilityMetadata::default()
                .idempotent(true)
                .with_retry(RetryPolicy::new(3, Duration::from_millis(10), 2.0)),
            true,
        );

        let result = registry.invoke("flaky", CapabilityArgs::new(), None).await;
        assert!(result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let entry = registry.resolve("flaky", None).unwrap();
        assert_eq!((entry.call_count(), entry.error_count()), (1, 0));
    }

    #[tokio::test]
    async fn counters_survive_concurrent_invokes() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let payload = if i % 4 == 0 { json!({}) } else { json!({"message": "m"}) };
                    registry.invoke("echo", args(payload), None).await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.total_calls, 20);
        assert_eq!(stats.total_errors, 5);
        assert_eq!(stats.success_rate, 75.0);
    }

    #[test]
    fn listing_and_descriptors_are_sorted_defaults() {
        let registry = CapabilityRegistry::new();
        registry.register(
            CapabilitySchema::new("zeta", "Last"),
            Invocable::blocking(|_| Ok(Value::Null)),
            CapabilityMetadata::default(),
            true,
        );
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);
        registry.register(echo_schema("2.0"), echo_with_prefix(""), CapabilityMetadata::default(), false);

        let listing = registry.list(false);
        let names: Vec<_> = listing.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["echo", "zeta"]);
        assert_eq!(listing[0].version, "1.0");
        assert_eq!(listing[0].success_rate, 100.0);
        assert_eq!(listing[0].versions_available, vec!["1.0".to_string(), "2.0".to_string()]);
        assert_eq!(listing[1].versions_available, vec!["1.0".to_string()]);
        assert!(registry.list(true).iter().all(|d| d.versions_available.is_empty()));

        let descriptors = registry.function_descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].function.name, "echo");
        assert_eq!(descriptors[0].function.parameters.required, vec!["message".to_string()]);

        assert_eq!(registry.names(), vec!["echo".to_string(), "zeta".to_string()]);
        assert_eq!(registry.stats().versions, 3);
    }

    #[tokio::test]
    async fn resolved_invocations_are_logged() {
        let registry = CapabilityRegistry::new();
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);
        registry.register(
            CapabilitySchema::new("noop", "Nothing"),
            Invocable::blocking(|_| Ok(Value::Null)),
            CapabilityMetadata::default(),
            true,
        );

        registry.invoke("echo", args(json!({"message": "hi"})), None).await;
        registry.invoke("echo", args(json!({"message": 7})), None).await;
        registry.invoke_json("echo", "not json", None).await;
        registry.invoke_json("noop", "", None).await;
        registry.invoke("missing", CapabilityArgs::new(), None).await;

        let log = registry.call_log();
        assert_eq!(log.len(), 4);

        let echoes = log.logs(Some("echo"));
        assert_eq!(echoes.len(), 3);
        assert!(echoes[0].success);
        assert_eq!(echoes[0].qualified_name, "echo@1.0");
        assert_eq!(echoes[0].arguments["message"], json!("hi"));
        assert!(!echoes[1].success);
        assert!(echoes[1].error.as_deref().unwrap().contains("Invalid arguments"));
        assert!(echoes[2].arguments.is_empty());

        assert_eq!(log.logs(Some("noop")).len(), 1);
        assert!(log.logs(Some("missing")).is_empty());
        assert_eq!(log.summary().successes, 2);
    }

    #[tokio::test]
    async fn call_log_bound_is_configurable() {
        let registry = CapabilityRegistry::new().with_call_log(CallLogger::new(2));
        registry.register(echo_schema("1.0"), echo_with_prefix(""), CapabilityMetadata::default(), true);

        for msg in ["a", "b", "c"] {
            registry.invoke("echo", args(json!({"message": msg})), None).await;
        }

        let kept: Vec<_> = registry
            .call_log()
            .logs(None)
            .into_iter()
            .map(|l| l.arguments["message"].clone())
            .collect();
        assert_eq!(kept, [json!("b"), json!("c")]);
        assert_eq!(registry.stats().total_calls, 3);
    }
}
