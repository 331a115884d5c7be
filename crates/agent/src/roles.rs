//! Agent roles: fixed instruction sets for single-shot specialists.
//!
//! A role either supplies the system instruction for a full
//! [`LoopController`](crate::LoopController) run, or drives a
//! [`RoleAgent`] that answers with one engine call.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use stepwise_core::message::Message;
use stepwise_core::provider::{Provider, ProviderRequest, Usage};
use stepwise_telemetry::BudgetGovernor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Researcher,
    Critic,
    Synthesizer,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        Self::Planner,
        Self::Researcher,
        Self::Critic,
        Self::Synthesizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Researcher => "researcher",
            Self::Critic => "critic",
            Self::Synthesizer => "synthesizer",
        }
    }

    /// System instruction for this role.
    pub fn build_instructions(&self) -> String {
        let body = match self {
            Self::Planner => {
                "You are a task planner. Break the user's goal into a short numbered \
                 list of concrete, independent steps. Name the capability each step \
                 needs when one applies. Do not carry out the steps yourself."
            }
            Self::Researcher => {
                "You are a researcher. Gather the facts needed for the task, using the \
                 available capabilities when they help. Report findings as concise \
                 bullet points and say when something could not be verified."
            }
            Self::Critic => {
                "You are a critic. Review the material you are given for errors, gaps, \
                 and unsupported claims. List each problem with a suggested fix, then \
                 give an overall verdict: ACCEPT or REVISE."
            }
            Self::Synthesizer => {
                "You are a synthesizer. Combine the plan, findings, and critique you \
                 are given into one clear final answer for the user. Resolve \
                 contradictions explicitly and keep only what is supported."
            }
        };
        body.to_string()
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown role '{s}' (expected one of: planner, researcher, critic, synthesizer)"
                )
            })
    }
}

/// What a [`RoleAgent`] produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleOutput {
    pub agent_name: String,
    pub role: AgentRole,
    pub content: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A named specialist that answers with a single engine call.
pub struct RoleAgent {
    name: String,
    role: AgentRole,
    provider: Arc<dyn Provider>,
    model: String,
    governor: Option<Arc<BudgetGovernor>>,
}

impl RoleAgent {
    pub fn new(
        name: impl Into<String>,
        role: AgentRole,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            provider,
            model: model.into(),
            governor: None,
        }
    }

    /// Record usage with `governor` and refuse to call once it is exhausted.
    pub fn with_governor(mut self, governor: Arc<BudgetGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Run one engine call on `input` under this role's instructions.
    ///
    /// Engine and budget failures are reported in the output, not raised.
    pub async fn process(&self, input: &str) -> RoleOutput {
        if let Some(governor) = &self.governor
            && !governor.can_proceed()
        {
            return self.failure("budget exhausted".into());
        }

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(self.role.build_instructions()),
                Message::user(input),
            ],
            tools: vec![],
        };

        tracing::debug!(agent = %self.name, role = %self.role, "Role agent processing");
        match self.provider.complete(request).await {
            Ok(response) => {
                if let (Some(governor), Some(usage)) = (&self.governor, response.usage) {
                    let label = format!("{}_{}", self.role, self.name);
                    governor.record_call(
                        u64::from(usage.input_tokens),
                        u64::from(usage.output_tokens),
                        response.billed_model(&self.model),
                        Some(&label),
                    );
                }
                RoleOutput {
                    agent_name: self.name.clone(),
                    role: self.role,
                    content: response.message.content,
                    success: true,
                    error: None,
                    usage: response.usage,
                }
            }
            Err(e) => {
                tracing::warn!(agent = %self.name, error = %e, "Role agent call failed");
                self.failure(e.to_string())
            }
        }
    }

    fn failure(&self, error: String) -> RoleOutput {
        RoleOutput {
            agent_name: self.name.clone(),
            role: self.role,
            content: String::new(),
            success: false,
            error: Some(error),
            usage: None,
        }
    }
}
