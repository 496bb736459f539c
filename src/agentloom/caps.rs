//! Runtime cap state (§3 "Caps"), updated deterministically during the C8 loop.

use chrono::{DateTime, Utc};

/// Workflow-local counters enforcing [`crate::registration::RunPolicy`] limits.
/// Destroyed at workflow completion; never persisted.
#[derive(Debug, Clone, Default)]
pub struct Caps {
    pub tool_calls_used: u32,
    pub consecutive_failures: u32,
    pub last_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl Caps {
    /// Start a fresh cap tracker for a run, deriving `deadline` from
    /// `time_budget` (zero means no deadline, per the §9 open-question
    /// resolution that zero caps mean "unlimited").
    pub fn start(time_budget: chrono::Duration) -> Self {
        let deadline = if time_budget.num_milliseconds() > 0 {
            Some(Utc::now() + time_budget)
        } else {
            None
        };
        Caps {
            tool_calls_used: 0,
            consecutive_failures: 0,
            last_at: None,
            deadline,
        }
    }

    /// Update counters after one tool call result. `failed` indicates whether
    /// the call produced a `ToolResult::Error`.
    pub fn record_call(&mut self, failed: bool) {
        self.tool_calls_used += 1;
        self.last_at = Some(Utc::now());
        if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
    }

    /// `true` once `deadline` has passed.
    pub fn deadline_reached(&self) -> bool {
        self.deadline.map(|d| Utc::now() >= d).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_time_budget_means_no_deadline() {
        let caps = Caps::start(chrono::Duration::zero());
        assert!(caps.deadline.is_none());
        assert!(!caps.deadline_reached());
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let mut caps = Caps::default();
        caps.record_call(true);
        caps.record_call(true);
        assert_eq!(caps.consecutive_failures, 2);
        caps.record_call(false);
        assert_eq!(caps.consecutive_failures, 0);
        assert_eq!(caps.tool_calls_used, 3);
    }
}
