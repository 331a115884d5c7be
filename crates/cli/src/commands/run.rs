//! `stepwise run`: drive a task against a scripted reasoning engine.
//!
//! Everything except the engine is real: the registry, middleware, budget
//! governor, and loop are the same components a live run uses.

use crate::runtime;
use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use std::path::PathBuf;
use std::sync::Arc;
use stepwise_agent::{AgentRole, LoopController, Script, ScriptedProvider, TaskState};
use stepwise_config::AppConfig;
use stepwise_core::event::{DomainEvent, EventBus};
use stepwise_telemetry::{BudgetGovernor, TraceRecord, TraceRecorder};
use stepwise_tools::CallLogSummary;

pub struct RunOptions {
    pub script: PathBuf,
    pub task: String,
    pub max_steps: Option<u32>,
    pub role: Option<String>,
    pub json: bool,
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: TaskState,
    pub trace: Option<TraceRecord>,
    pub calls: CallLogSummary,
}

pub async fn run(config: &AppConfig, options: RunOptions) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&options.script)
        .with_context(|| format!("reading script {}", options.script.display()))?;
    let script = Script::from_json(&raw)
        .with_context(|| format!("parsing script {}", options.script.display()))?;

    let governor = Arc::new(runtime::governor(config));
    let outcome = execute(config, script, &options, governor.clone()).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome.state)?);
    } else {
        print!("{}", summary(&outcome.state));
        if let Some(trace) = &outcome.trace {
            println!();
            println!("{}", trace.report());
        }
        println!();
        println!("{}", outcome.calls);
        println!();
        println!("{}", governor.report());
    }
    Ok(())
}

/// Build the runtime from `config`, run the task, and return its final state
/// with the trace and call log it produced.
pub async fn execute(
    config: &AppConfig,
    script: Script,
    options: &RunOptions,
    governor: Arc<BudgetGovernor>,
) -> anyhow::Result<RunOutcome> {
    let role = options
        .role
        .as_deref()
        .or(config.agent.role.as_deref())
        .map(str::parse::<AgentRole>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let max_steps = options.max_steps.unwrap_or(config.agent.max_steps);

    let (registry, _store) = runtime::registry(config);
    let registry = Arc::new(registry);
    let recorder = Arc::new(TraceRecorder::new(config.telemetry.max_traces));
    let event_bus = Arc::new(EventBus::new(config.telemetry.event_capacity));
    let mut events = event_bus.subscribe();
    let listener = {
        let recorder = recorder.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let DomainEvent::BudgetAlert { level, message, .. } = event.as_ref() {
                            tracing::warn!(%level, "{message}");
                        }
                        recorder.observe(&event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Trace listener fell behind; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let mut controller = LoopController::new(
        Arc::new(ScriptedProvider::new(script)),
        registry.clone(),
        governor,
        event_bus,
    )
    .with_model(config.agent.model.clone());
    if let Some(role) = role {
        controller = controller.with_role(role);
    }

    let state = controller.run_with_registry(&options.task, max_steps).await;
    drop(controller);
    // the bus closes once the controller is gone
    let _ = listener.await;
    Ok(RunOutcome {
        trace: recorder.get(&state.task_id),
        calls: registry.call_log().summary(),
        state,
    })
}

fn summary(state: &TaskState) -> String {
    let mut out = format!("Task {} finished: {}\n", state.task_id, state.status());
    out.push_str(&format!("  Steps:       {}\n", state.current_step));
    out.push_str(&format!("  Tool calls:  {}\n", state.tool_log.len()));
    for record in &state.tool_log {
        let mark = if record.success { "ok " } else { "err" };
        out.push_str(&format!(
            "    [{mark}] step {} {} → {}\n",
            record.step, record.qualified_name, record.output
        ));
    }
    if let Some(answer) = &state.final_answer {
        out.push_str(&format!("  Answer:      {answer}\n"));
    }
    if let Some(error) = &state.error {
        out.push_str(&format!("  Error:       {error}\n"));
    }
    out
}
