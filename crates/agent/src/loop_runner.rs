//! The step-bounded reasoning loop.

use crate::roles::AgentRole;
use crate::state::{TaskState, TaskStatus, ToolRecord};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use stepwise_core::capability::FunctionDescriptor;
use stepwise_core::event::{DomainEvent, EventBus};
use stepwise_core::message::{Message, MessageToolCall};
use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
use stepwise_telemetry::BudgetGovernor;
use stepwise_tools::CapabilityRegistry;
use tracing::{debug, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that completes tasks step by step. \
Use the available tools when they help. When the task is done, reply with the final answer \
as plain text.";

/// Drives one task from the initial prompt to a terminal status.
///
/// Each step asks the reasoning engine for the next move. Tool-call requests
/// are dispatched one by one through the [`CapabilityRegistry`] and their
/// results appended to history; plain content ends the task. The
/// [`BudgetGovernor`] is consulted before the first call and after every
/// step.
pub struct LoopController {
    /// The reasoning engine
    provider: Arc<dyn Provider>,

    /// Capabilities the engine may call
    registry: Arc<CapabilityRegistry>,

    /// Spend tracking, possibly shared with other loops
    governor: Arc<BudgetGovernor>,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    /// The model to request
    model: String,

    /// System instruction placed first in history
    system_prompt: String,

    role: Option<AgentRole>,
}

impl LoopController {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<CapabilityRegistry>,
        governor: Arc<BudgetGovernor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            registry,
            governor,
            event_bus,
            model: "gpt-4o-mini".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            role: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the default system instruction.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Adopt a role; its instructions become the system instruction.
    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.system_prompt = role.build_instructions();
        self.role = Some(role);
        self
    }

    pub fn role(&self) -> Option<AgentRole> {
        self.role
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run `task` offering every default capability in the registry.
    pub async fn run_with_registry(&self, task: &str, max_steps: u32) -> TaskState {
        let capabilities = self.registry.function_descriptors();
        self.run(task, max_steps, &capabilities).await
    }

    /// Run `task` for at most `max_steps` engine round trips.
    ///
    /// Never returns an error: the outcome is in [`TaskState::status`].
    pub async fn run(
        &self,
        task: &str,
        max_steps: u32,
        capabilities: &[FunctionDescriptor],
    ) -> TaskState {
        let mut state = TaskState::new(task);

        if task.trim().is_empty() {
            state.fail("task must not be empty");
            return self.finish(state);
        }
        if max_steps == 0 {
            state.fail("max_steps must be at least 1");
            return self.finish(state);
        }

        state.transition(TaskStatus::Running);
        state.push(Message::system(&self.system_prompt));
        state.push(Message::user(task));

        info!(
            task_id = %state.task_id,
            max_steps,
            capabilities = capabilities.len(),
            role = ?self.role,
            "Task started"
        );

        if !self.governor.can_proceed() {
            state.transition(TaskStatus::BudgetExceeded);
            return self.finish(state);
        }

        for step in 1..=max_steps {
            state.current_step = step;
            self.event_bus.publish(DomainEvent::StepStarted {
                task_id: state.task_id.clone(),
                step,
                timestamp: Utc::now(),
            });
            debug!(task_id = %state.task_id, step, "Loop step");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: state.messages.clone(),
                tools: capabilities.to_vec(),
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(task_id = %state.task_id, step, error = %e, "Reasoning engine failed");
                    state.fail(e.to_string());
                    return self.finish(state);
                }
            };

            self.record_usage(&state, step, &response);

            let message = response.message;
            if message.has_tool_calls() {
                debug!(count = message.tool_calls.len(), "Dispatching tool calls");
                for call in message.tool_calls {
                    self.dispatch(&mut state, step, call).await;
                }
            } else if !message.content.is_empty() {
                let answer = message.content.clone();
                state.push(message);
                state.complete(answer);
                return self.finish(state);
            } else {
                warn!(task_id = %state.task_id, step, "Empty response from reasoning engine");
            }

            if !self.governor.can_proceed() {
                state.transition(TaskStatus::BudgetExceeded);
                return self.finish(state);
            }
        }

        state.transition(TaskStatus::MaxLoopsExceeded);
        self.finish(state)
    }

    /// Invoke one requested capability and append the request/result pair.
    async fn dispatch(&self, state: &mut TaskState, step: u32, call: MessageToolCall) {
        let started = Instant::now();
        let result = self
            .registry
            .invoke_json(&call.name, &call.arguments, None)
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let output = result.render();

        self.event_bus.publish(DomainEvent::CapabilityInvoked {
            task_id: state.task_id.clone(),
            name: call.name.clone(),
            success: result.success,
            duration_ms,
            timestamp: Utc::now(),
        });

        // unknown names never reach the registry's counters, nor the log
        if let Some(qualified_name) = result.qualified_name {
            state.tool_log.push(ToolRecord {
                step,
                name: call.name.clone(),
                qualified_name,
                arguments: call.arguments.clone(),
                success: result.success,
                output: output.clone(),
            });
        } else {
            warn!(task_id = %state.task_id, capability = %call.name, "Unknown capability requested");
        }

        let call_id = call.id.clone();
        state.push(Message::tool_request(call));
        state.push(Message::tool_result(call_id, output));
    }

    fn record_usage(&self, state: &TaskState, step: u32, response: &ProviderResponse) {
        let Some(usage) = response.usage else {
            return;
        };
        let model = response.billed_model(&self.model);
        let label = format!("step_{step}");
        let report = self.governor.record_call(
            u64::from(usage.input_tokens),
            u64::from(usage.output_tokens),
            model,
            Some(&label),
        );

        self.event_bus.publish(DomainEvent::ReasoningCompleted {
            task_id: state.task_id.clone(),
            step,
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: report.cost,
            timestamp: Utc::now(),
        });

        if let Some(alert) = report.alert {
            self.event_bus.publish(DomainEvent::BudgetAlert {
                level: alert.level.to_string(),
                message: alert.message,
                usage_percent: alert.usage_percent,
                timestamp: alert.timestamp,
            });
        }
    }

    fn finish(&self, state: TaskState) -> TaskState {
        info!(
            task_id = %state.task_id,
            status = %state.status(),
            steps = state.current_step,
            tool_calls = state.tool_log.len(),
            "Task finished"
        );
        self.event_bus.publish(DomainEvent::TaskFinished {
            task_id: state.task_id.clone(),
            status: state.status().to_string(),
            steps: state.current_step,
            timestamp: Utc::now(),
        });
        state
    }
}
