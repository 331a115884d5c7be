//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the Stepwise agent runtime.
//! This crate has **zero framework dependencies**. It defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the runtime talks to is defined as a trait here: the
//! reasoning engine ([`Provider`]) and capability bodies ([`Capability`],
//! [`BlockingCapability`]). Implementations live elsewhere, which keeps the
//! loop testable with scripted engines.

pub mod capability;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use capability::{
    BlockingCapability, Capability, CapabilityArgs, CapabilityMetadata, CapabilityOutput,
    CapabilitySchema, FunctionDescriptor, Invocable, InvocationResult, ParamSpec, ParamType,
    RetryPolicy, qualified_name,
};
pub use error::{CapabilityError, ProviderError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
