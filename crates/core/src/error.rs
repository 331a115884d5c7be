//! Error types for the Stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// Failures talking to the reasoning engine.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Failures dispatching a capability.
///
/// All of these are recoverable: the registry converts them into an
/// [`InvocationResult`](crate::capability::InvocationResult) and the loop
/// feeds that back into the conversation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("Capability not found: '{name}'{}", version.as_ref().map(|v| format!(" (version {v})")).unwrap_or_default())]
    NotFound {
        name: String,
        version: Option<String>,
    },

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: f64 },

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("All {attempts} attempts failed. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl CapabilityError {
    /// Shorthand for an execution failure raised by a capability body.
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed(reason.into())
    }

    /// Whether this failure came from the deadline rather than the body.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
