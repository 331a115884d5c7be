//! Task state owned by a single loop run.

use serde::{Deserialize, Serialize};
use stepwise_core::message::Message;

/// Lifecycle of one task.
///
/// `Idle` is initial and `Running` is the only non-terminal working state.
/// The other four are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Running,
    Completed,
    Failed,
    BudgetExceeded,
    MaxLoopsExceeded,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::BudgetExceeded | Self::MaxLoopsExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::BudgetExceeded => "budget_exceeded",
            Self::MaxLoopsExceeded => "max_loops_exceeded",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact record of one dispatched capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub step: u32,
    pub name: String,
    /// `name@version` of the entry that handled the call.
    pub qualified_name: String,
    /// Raw JSON argument string as the engine sent it.
    pub arguments: String,
    pub success: bool,
    /// Rendered result or error text, as fed back to the engine.
    pub output: String,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub task: String,
    /// Append-only conversation history.
    pub messages: Vec<Message>,
    pub current_step: u32,
    status: TaskStatus,
    pub final_answer: Option<String>,
    /// Append-only log of dispatched capability calls.
    pub tool_log: Vec<ToolRecord>,
    /// Set when the run ends in `Failed`.
    pub error: Option<String>,
}

impl TaskState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            messages: Vec::new(),
            current_step: 0,
            status: TaskStatus::Idle,
            final_answer: None,
            tool_log: Vec::new(),
            error: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`. Refused (returns false) once a terminal status is set.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status.is_terminal() {
            tracing::warn!(
                task_id = %self.task_id,
                from = %self.status,
                to = %next,
                "Ignoring transition out of terminal status"
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn complete(&mut self, answer: String) {
        if self.transition(TaskStatus::Completed) {
            self.final_answer = Some(answer);
        }
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        if self.transition(TaskStatus::Failed) {
            self.error = Some(error.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_empty() {
        let state = TaskState::new("echo test");
        assert_eq!(state.status(), TaskStatus::Idle);
        assert_eq!(state.current_step, 0);
        assert!(state.messages.is_empty());
        assert!(!state.is_finished());
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut state = TaskState::new("t");
        assert!(state.transition(TaskStatus::Running));
        state.complete("done".into());
        assert_eq!(state.status(), TaskStatus::Completed);

        assert!(!state.transition(TaskStatus::Running));
        state.fail("late failure");
        assert_eq!(state.status(), TaskStatus::Completed);
        assert!(state.error.is_none());
        assert_eq!(state.final_answer.as_deref(), Some("done"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::MaxLoopsExceeded).unwrap(),
            "\"max_loops_exceeded\""
        );
        assert_eq!(TaskStatus::BudgetExceeded.to_string(), "budget_exceeded");
        assert!(!TaskStatus::Running.is_terminal());
    }
}
