//! Per-task execution traces assembled from domain events.
//!
//! [`TraceRecorder::observe`] folds the loop's [`DomainEvent`]s into one
//! [`TraceRecord`] per task: a [`TraceStep`] per loop step with its duration,
//! engine usage and the capability calls made during it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};
use stepwise_core::event::DomainEvent;

pub const DEFAULT_MAX_TRACES: usize = 50;

/// One capability call made during a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpan {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// One loop step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u32,
    pub started_at: DateTime<Utc>,
    /// Time until the next step started or the task finished.
    /// `None` while the step is still open.
    pub duration_ms: Option<u64>,
    /// Set once the engine's usage for this step was recorded.
    pub model: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub capabilities: Vec<CapabilitySpan>,
}

impl TraceStep {
    fn new(step: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            step,
            started_at,
            duration_ms: None,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            capabilities: Vec::new(),
        }
    }

    fn close(&mut self, at: DateTime<Utc>) {
        if self.duration_ms.is_none() {
            self.duration_ms = Some(millis_between(self.started_at, at));
        }
    }

    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Everything observed for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal status, once the task finished.
    pub status: Option<String>,
    pub steps: Vec<TraceStep>,
}

impl TraceRecord {
    fn new(task_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            started_at,
            finished_at: None,
            status: None,
            steps: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.cost_usd).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.steps.iter().map(TraceStep::total_tokens).sum()
    }

    /// Wall-clock time from the first event to the finish event.
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| millis_between(self.started_at, end))
    }

    pub fn capability_count(&self) -> usize {
        self.steps.iter().map(|s| s.capabilities.len()).sum()
    }

    /// The step that took longest, if any step has closed.
    pub fn slowest_step(&self) -> Option<&TraceStep> {
        self.steps
            .iter()
            .filter(|s| s.duration_ms.is_some())
            .max_by_key(|s| s.duration_ms)
    }

    /// Human-readable breakdown of the task.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Trace for task {}", self.task_id);
        let _ = writeln!(out, "─────────────────────────────────────");
        for step in &self.steps {
            let duration = step
                .duration_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "running".into());
            let _ = write!(out, "  Step {:<3} {:>9}", step.step, duration);
            if let Some(model) = &step.model {
                let _ = write!(
                    out,
                    "  {model} {} tokens ${:.4}",
                    step.total_tokens(),
                    step.cost_usd
                );
            }
            out.push('\n');
            for call in &step.capabilities {
                let mark = if call.success { "ok " } else { "err" };
                let _ = writeln!(out, "      [{mark}] {} {}ms", call.name, call.duration_ms);
            }
        }
        let _ = writeln!(out, "─────────────────────────────────────");
        let _ = writeln!(
            out,
            "  Status:       {}",
            self.status.as_deref().unwrap_or("running")
        );
        if let Some(ms) = self.duration_ms() {
            let _ = writeln!(out, "  Duration:     {ms}ms");
        }
        let _ = writeln!(out, "  Steps:        {}", self.steps.len());
        let _ = writeln!(out, "  Capabilities: {}", self.capability_count());
        let _ = writeln!(out, "  Tokens:       {}", self.total_tokens());
        let _ = write!(out, "  Cost:         ${:.4}", self.total_cost());
        out
    }
}

/// Collects traces for the most recent tasks.
///
/// Holds at most `max_traces` records. When a new task appears and the
/// recorder is full, the oldest finished trace is evicted, or the oldest
/// trace if none has finished.
#[derive(Debug)]
pub struct TraceRecorder {
    max_traces: usize,
    traces: RwLock<Vec<TraceRecord>>,
}

impl TraceRecorder {
    pub fn new(max_traces: usize) -> Self {
        Self {
            max_traces: max_traces.max(1),
            traces: RwLock::new(Vec::new()),
        }
    }

    pub fn max_traces(&self) -> usize {
        self.max_traces
    }

    /// Fold one event into the matching task's trace.
    ///
    /// Budget alerts carry no task and are ignored; the governor keeps them.
    pub fn observe(&self, event: &DomainEvent) {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            DomainEvent::StepStarted {
                task_id,
                step,
                timestamp,
            } => {
                let trace = self.trace_mut(&mut traces, task_id, *timestamp);
                if let Some(last) = trace.steps.last_mut() {
                    last.close(*timestamp);
                }
                trace.steps.push(TraceStep::new(*step, *timestamp));
            }
            DomainEvent::ReasoningCompleted {
                task_id,
                step,
                model,
                input_tokens,
                output_tokens,
                cost_usd,
                timestamp,
            } => {
                let trace = self.trace_mut(&mut traces, task_id, *timestamp);
                if let Some(s) = trace.steps.iter_mut().rev().find(|s| s.step == *step) {
                    s.model = Some(model.clone());
                    s.input_tokens = *input_tokens;
                    s.output_tokens = *output_tokens;
                    s.cost_usd = *cost_usd;
                }
            }
            DomainEvent::CapabilityInvoked {
                task_id,
                name,
                success,
                duration_ms,
                timestamp,
            } => {
                let trace = self.trace_mut(&mut traces, task_id, *timestamp);
                if let Some(last) = trace.steps.last_mut() {
                    last.capabilities.push(CapabilitySpan {
                        name: name.clone(),
                        success: *success,
                        duration_ms: *duration_ms,
                        timestamp: *timestamp,
                    });
                }
            }
            DomainEvent::TaskFinished {
                task_id,
                status,
                timestamp,
                ..
            } => {
                let trace = self.trace_mut(&mut traces, task_id, *timestamp);
                if let Some(last) = trace.steps.last_mut() {
                    last.close(*timestamp);
                }
                trace.finished_at = Some(*timestamp);
                trace.status = Some(status.clone());
                tracing::debug!(
                    task_id = %task_id,
                    status = %status,
                    steps = trace.steps.len(),
                    cost_usd = trace.total_cost(),
                    "Trace completed"
                );
            }
            DomainEvent::BudgetAlert { .. } => {}
        }
    }

    fn trace_mut<'a>(
        &self,
        traces: &'a mut Vec<TraceRecord>,
        task_id: &str,
        first_seen: DateTime<Utc>,
    ) -> &'a mut TraceRecord {
        let index = match traces.iter().position(|t| t.task_id == task_id) {
            Some(i) => i,
            None => {
                if traces.len() >= self.max_traces {
                    let evict = traces.iter().position(TraceRecord::is_finished).unwrap_or(0);
                    let dropped = traces.remove(evict);
                    tracing::debug!(task_id = %dropped.task_id, "Trace evicted");
                }
                traces.push(TraceRecord::new(task_id, first_seen));
                traces.len() - 1
            }
        };
        &mut traces[index]
    }

    pub fn get(&self, task_id: &str) -> Option<TraceRecord> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().find(|t| t.task_id == task_id).cloned()
    }

    /// Most recent traces first.
    pub fn recent(&self, limit: usize) -> Vec<TraceRecord> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.traces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cost per loop step summed over every retained trace, keyed by step number.
    pub fn cost_by_step(&self) -> BTreeMap<u32, f64> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = BTreeMap::new();
        for step in traces.iter().flat_map(|t| t.steps.iter()) {
            *out.entry(step.step).or_insert(0.0) += step.cost_usd;
        }
        out
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACES)
    }
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from(end.signed_duration_since(start).num_milliseconds()).unwrap_or(0)
}
