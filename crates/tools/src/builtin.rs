//! Built-in capabilities: echo, clock, and a key/value store shared between
//! agents.
//!
//! Demonstrates all three execution shapes the registry supports: a
//! suspending body (`echo`), a blocking body (`get_time`), and bodies that
//! close over an injected handle (`store_write`, `store_read`).

use crate::registry::CapabilityRegistry;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use stepwise_core::capability::{
    BlockingCapability, Capability, CapabilityArgs, CapabilityMetadata, CapabilityOutput,
    CapabilitySchema, Invocable, ParamType,
};
use stepwise_core::error::CapabilityError;

// ── Echo ──────────────────────────────────────────────────────────────────

pub struct Echo;

impl Echo {
    pub fn schema() -> CapabilitySchema {
        CapabilitySchema::new("echo", "Return the given message unchanged.")
            .param("message", ParamType::String, "Text to echo back", true)
    }
}

#[async_trait]
impl Capability for Echo {
    async fn invoke(&self, args: CapabilityArgs) -> CapabilityOutput {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::execution("Missing 'message' argument"))?;
        Ok(json!(message))
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────

/// Fixed offsets for the zones the clock knows about.
const TIMEZONE_OFFSETS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("Europe/Istanbul", 3),
    ("Europe/London", 0),
    ("Europe/Berlin", 1),
    ("Europe/Paris", 1),
    ("US/Eastern", -5),
    ("US/Pacific", -8),
    ("Asia/Tokyo", 9),
    ("Asia/Dubai", 4),
];

pub struct Clock;

impl Clock {
    pub fn schema() -> CapabilitySchema {
        CapabilitySchema::new("get_time", "Current date and time in a time zone.").param(
            "timezone",
            ParamType::String,
            "Zone name such as 'UTC' or 'Europe/Istanbul' (default UTC)",
            false,
        )
    }
}

impl BlockingCapability for Clock {
    fn invoke(&self, args: CapabilityArgs) -> CapabilityOutput {
        let zone = args.get("timezone").and_then(Value::as_str).unwrap_or("UTC");
        let hours = TIMEZONE_OFFSETS
            .iter()
            .find(|(name, _)| *name == zone)
            .map(|(_, h)| *h)
            .ok_or_else(|| {
                let supported: Vec<&str> = TIMEZONE_OFFSETS.iter().map(|(n, _)| *n).collect();
                CapabilityError::execution(format!(
                    "Unknown timezone '{zone}'. Supported: {}",
                    supported.join(", ")
                ))
            })?;
        let offset = FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| CapabilityError::execution(format!("Invalid offset for '{zone}'")))?;

        let now = Utc::now().with_timezone(&offset);
        Ok(json!({
            "time": now.format("%H:%M:%S").to_string(),
            "date": now.format("%Y-%m-%d").to_string(),
            "day_of_week": now.format("%A").to_string(),
            "timezone": zone,
            "utc_offset": now.format("%:z").to_string(),
        }))
    }
}

// ── Shared key/value store ────────────────────────────────────────────────

/// In-memory key/value store. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns whether the key already existed.
    pub fn store(&self, key: impl Into<String>, value: Value) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
            .is_some()
    }

    pub fn retrieve(&self, key: &str) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Keys in sorted order.
    pub fn list_keys(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_schema() -> CapabilitySchema {
        CapabilitySchema::new("store_write", "Save a value under a key in shared memory.")
            .param("key", ParamType::String, "Key to write", true)
            .param("value", ParamType::String, "Value to store", true)
    }

    fn read_schema() -> CapabilitySchema {
        CapabilitySchema::new("store_read", "Read the value stored under a key.")
            .param("key", ParamType::String, "Key to read", true)
    }

    fn write_invocable(&self) -> Invocable {
        let store = self.clone();
        Invocable::blocking(move |args| {
            let key = required_str(&args, "key")?;
            let value = args.get("value").cloned().unwrap_or(Value::Null);
            let overwritten = store.store(key, value);
            Ok(json!({"key": key, "stored": true, "overwritten": overwritten}))
        })
    }

    fn read_invocable(&self) -> Invocable {
        let store = self.clone();
        Invocable::blocking(move |args| {
            let key = required_str(&args, "key")?;
            store.retrieve(key).ok_or_else(|| {
                CapabilityError::execution(format!(
                    "Key '{key}' not found. Available keys: {}",
                    store.list_keys().join(", ")
                ))
            })
        })
    }
}

fn required_str<'a>(args: &'a CapabilityArgs, key: &str) -> Result<&'a str, CapabilityError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::execution(format!("Missing '{key}' argument")))
}

/// Register echo, clock, and the store capabilities bound to `store`.
pub fn register_builtins(registry: &CapabilityRegistry, store: &MemoryStore) {
    let fast = CapabilityMetadata::default()
        .with_timeout(Duration::from_secs(5))
        .idempotent(true);

    registry.register(Echo::schema(), Invocable::suspending(Echo), fast.clone(), true);
    registry.register(Clock::schema(), Invocable::from_blocking(Clock), fast.clone(), true);
    registry.register(
        MemoryStore::write_schema(),
        store.write_invocable(),
        fast.clone(),
        true,
    );
    registry.register(MemoryStore::read_schema(), store.read_invocable(), fast, true);
}

/// A registry with every built-in capability and a fresh store.
pub fn default_registry() -> (CapabilityRegistry, MemoryStore) {
    let registry = CapabilityRegistry::new();
    let store = MemoryStore::new();
    register_builtins(&registry, &store);
    (registry, store)
}
