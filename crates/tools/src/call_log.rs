//! Bounded log of capability invocations.
//!
//! The registry appends one [`CallLog`] per resolved invocation. Once
//! `max_logs` entries are held, the oldest is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use stepwise_core::capability::CapabilityArgs;

pub const DEFAULT_MAX_LOGS: usize = 100;

/// One logged invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    /// `name@version` of the entry that ran.
    pub qualified_name: String,
    pub arguments: CapabilityArgs,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Aggregate view over the retained logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogSummary {
    pub calls: usize,
    pub successes: usize,
    /// Percentage, 0 to 100. 100 when nothing is logged.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

impl fmt::Display for CallLogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.calls == 0 {
            return write!(f, "No capability calls logged yet.");
        }
        writeln!(f, "Capability calls")?;
        writeln!(f, "  Total:     {}", self.calls)?;
        writeln!(f, "  Succeeded: {} ({:.0}%)", self.successes, self.success_rate)?;
        write!(f, "  Avg time:  {:.0}ms", self.avg_duration_ms)
    }
}

#[derive(Debug)]
pub struct CallLogger {
    max_logs: usize,
    logs: Mutex<VecDeque<CallLog>>,
}

impl CallLogger {
    /// A log holding at most `max_logs` entries. Zero disables logging.
    pub fn new(max_logs: usize) -> Self {
        Self {
            max_logs,
            logs: Mutex::new(VecDeque::with_capacity(max_logs.min(DEFAULT_MAX_LOGS))),
        }
    }

    pub fn max_logs(&self) -> usize {
        self.max_logs
    }

    pub fn record(&self, log: CallLog) {
        if self.max_logs == 0 {
            return;
        }
        tracing::debug!(
            capability = %log.qualified_name,
            success = log.success,
            duration_ms = log.duration_ms,
            "Capability call logged"
        );
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.push_back(log);
        while logs.len() > self.max_logs {
            logs.pop_front();
        }
    }

    /// Retained logs, oldest first, optionally only those for `name`.
    pub fn logs(&self, name: Option<&str>) -> Vec<CallLog> {
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.iter()
            .filter(|log| name.is_none_or(|n| log.name == n))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn summary(&self) -> CallLogSummary {
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        let calls = logs.len();
        let successes = logs.iter().filter(|l| l.success).count();
        let (success_rate, avg_duration_ms) = if calls == 0 {
            (100.0, 0.0)
        } else {
            let total_ms: u64 = logs.iter().map(|l| l.duration_ms).sum();
            (
                successes as f64 / calls as f64 * 100.0,
                total_ms as f64 / calls as f64,
            )
        };
        CallLogSummary {
            calls,
            successes,
            success_rate,
            avg_duration_ms,
        }
    }
}

impl Default for CallLogger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOGS)
    }
}
