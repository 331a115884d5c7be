//! Provider trait: the abstraction over the reasoning engine.
//!
//! A Provider receives the full task history plus the capability descriptors
//! and answers with either plain content or a set of tool-call requests.
//! The runtime never generates text itself; it only drives this interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::capability::FunctionDescriptor;
use crate::error::ProviderError;
use crate::message::Message;

/// One round trip to the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The full task history
    pub messages: Vec<Message>,

    /// Capabilities the engine may request; empty means no tool use
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionDescriptor>,
}

/// A complete response from the reasoning engine.
///
/// Exactly one of `message.content` / `message.tool_calls` is expected to be
/// populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Unit usage statistics, used for budget accounting
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Input/output unit counts reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

impl ProviderResponse {
    /// The model to bill this response as: the one that answered, or
    /// `requested` when the engine left it blank.
    pub fn billed_model<'a>(&'a self, requested: &'a str) -> &'a str {
        if self.model.is_empty() {
            requested
        } else {
            &self.model
        }
    }
}

/// The reasoning engine contract.
///
/// The loop controller calls `complete()` without knowing which backend is
/// behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send the history and capability descriptors, get one response back.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}
