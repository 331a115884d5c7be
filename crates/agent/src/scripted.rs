//! A reasoning engine that replays a fixed script.
//!
//! Used for offline dry runs from the CLI and by tests. Each `complete` call
//! returns the next step; once the script is exhausted the engine either
//! repeats the last step or reports an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, MessageToolCall};
use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// One scripted tool call. A string `arguments` is passed through verbatim,
/// so malformed JSON can be scripted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One scripted engine answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ScriptedCall>,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Fail this round trip with a network error instead of answering.
    #[serde(default)]
    pub error: Option<String>,
}

impl ScriptStep {
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_calls: vec![ScriptedCall {
                name: name.into(),
                arguments,
            }],
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Some(Usage::new(input_tokens, output_tokens));
        self
    }
}

/// A script file: the model to report and the steps to replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default = "default_script_model")]
    pub model: String,
    pub steps: Vec<ScriptStep>,
    /// Keep answering with the last step once the others are used up.
    #[serde(default)]
    pub repeat_last: bool,
}

fn default_script_model() -> String {
    "gpt-4o-mini".into()
}

impl Script {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

struct Cursor {
    pending: VecDeque<ScriptStep>,
    last: Option<ScriptStep>,
    calls: u32,
}

/// Replays a [`Script`] as a [`Provider`].
pub struct ScriptedProvider {
    model: String,
    repeat_last: bool,
    cursor: Mutex<Cursor>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            model: script.model,
            repeat_last: script.repeat_last,
            cursor: Mutex::new(Cursor {
                pending: script.steps.into(),
                last: None,
                calls: 0,
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script the given steps, reported as `gpt-4o-mini`.
    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self::new(Script {
            model: default_script_model(),
            steps,
            repeat_last: false,
        })
    }

    /// Answer every request with `step`.
    pub fn repeating(step: ScriptStep) -> Self {
        Self::new(Script {
            model: default_script_model(),
            steps: vec![step],
            repeat_last: true,
        })
    }

    pub fn call_count(&self) -> u32 {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner).calls
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_step(&self) -> Option<(u32, ScriptStep)> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let step = match cursor.pending.pop_front() {
            Some(step) => {
                cursor.last = Some(step.clone());
                step
            }
            None if self.repeat_last => cursor.last.clone()?,
            None => return None,
        };
        cursor.calls += 1;
        Some((cursor.calls, step))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let (n, step) = self
            .next_step()
            .ok_or_else(|| ProviderError::MalformedResponse("script exhausted".into()))?;

        if let Some(error) = step.error {
            return Err(ProviderError::Network(error));
        }

        let mut message = Message::assistant(step.content.unwrap_or_default());
        message.tool_calls = step
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, call)| MessageToolCall {
                id: format!("call_{n}_{i}"),
                name: call.name.clone(),
                arguments: match &call.arguments {
                    Value::String(raw) => raw.clone(),
                    Value::Null => "{}".into(),
                    other => other.to_string(),
                },
            })
            .collect();

        Ok(ProviderResponse {
            message,
            usage: step.usage,
            model: self.model.clone(),
        })
    }
}
