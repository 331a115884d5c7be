//! Capability execution for Stepwise.
//!
//! The [`CapabilityRegistry`] holds versioned capabilities and dispatches
//! invocations through the [`MiddlewarePipeline`], which enforces deadlines
//! and idempotency-gated retry. Each resolved invocation lands in the
//! registry's bounded [`CallLogger`]. A handful of built-in capabilities are
//! provided for demos and dry runs.

pub mod builtin;
pub mod call_log;
pub mod middleware;
pub mod registry;

pub use builtin::{MemoryStore, default_registry, register_builtins};
pub use call_log::{CallLog, CallLogSummary, CallLogger, DEFAULT_MAX_LOGS};
pub use middleware::{DEFAULT_TIMEOUT, MiddlewarePipeline, RetryOutcome};
pub use registry::{CapabilityDescriptor, CapabilityEntry, CapabilityRegistry, RegistryStats};
