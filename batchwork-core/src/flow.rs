//! Step transition table
//!
//! Maps a finished step's name and exit code to what the job does next.
//! Jobs without explicit rules continue on success and fail on failure.

use std::collections::HashMap;

use crate::status::{BatchStatus, ExitStatus};

/// What the engine does after a step finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    /// Run the next step in order
    Continue,
    /// End the job as FAILED
    Fail,
    /// End the job as STOPPED (restartable from the next step)
    Stop,
    /// End the job as COMPLETED without running further steps
    Complete,
}

/// Rules keyed by step name and exit code; `*` matches any step or code
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    rules: HashMap<(String, String), FlowAction>,
}

const WILDCARD: &str = "*";

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule; use `*` for the step name or exit code to match anything
    pub fn on(
        mut self,
        step_name: impl Into<String>,
        exit_code: impl Into<String>,
        action: FlowAction,
    ) -> Self {
        self.rules.insert((step_name.into(), exit_code.into()), action);
        self
    }

    /// Decide the next action for a finished step
    pub fn next_action(&self, step_name: &str, status: BatchStatus, exit_status: &ExitStatus) -> FlowAction {
        let code = exit_status.exit_code.as_str();
        let candidates = [
            (step_name, code),
            (step_name, WILDCARD),
            (WILDCARD, code),
            (WILDCARD, WILDCARD),
        ];
        for (step, code) in candidates {
            if let Some(action) = self.rules.get(&(step.to_string(), code.to_string())) {
                return action.clone();
            }
        }

        match status {
            BatchStatus::Completed => FlowAction::Continue,
            BatchStatus::Stopped | BatchStatus::Stopping => FlowAction::Stop,
            _ => FlowAction::Fail,
        }
    }
}
