// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fmt;

use thiserror::Error;

/// Stable label naming the phase within a task where an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ModelInteraction,
    ToolExecution,
    RunTask,
    CtxCheck,
    FinalNoResponses,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ModelInteraction => "model_interaction",
            Stage::ToolExecution => "tool_execution",
            Stage::RunTask => "run_task",
            Stage::CtxCheck => "ctx_check",
            Stage::FinalNoResponses => "final_no_responses",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Streaming model call failed after all retries.
    #[error("model interaction failed: {0}")]
    ModelStream(#[source] anyhow::Error),

    /// A single model call exceeded its request timeout.
    #[error("model request timed out")]
    RequestTimeout,

    /// The turn's tool wait exceeded its deadline.
    #[error("timed out waiting for tool results")]
    ToolTimeout,

    /// The tool wait failed for a reason other than deadline or cancellation
    /// (e.g. the bus shut down underneath the turn).
    #[error("tool wait failed: {0}")]
    ToolWait(#[source] anyhow::Error),

    /// The ambient context was cancelled.  Carries the stage the cancellation
    /// landed in, when one applies.
    #[error("task interrupted")]
    Interrupted(Option<Stage>),

    /// Compaction cannot shrink a one-item history below the window.
    #[error("context window too small for compaction")]
    ContextWindowTooSmallForCompaction,

    /// Rejected at submission ingress (missing client, missing user input,
    /// empty items).
    #[error("invalid submission: {0}")]
    Submission(String),
}

impl CoreError {
    /// Stage tag attached when the error surfaces from a turn.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CoreError::ModelStream(_) | CoreError::RequestTimeout => Some(Stage::ModelInteraction),
            CoreError::ToolTimeout | CoreError::ToolWait(_) => Some(Stage::ToolExecution),
            CoreError::Interrupted(stage) => *stage,
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoreError::Interrupted(_))
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, CoreError::RequestTimeout | CoreError::ToolTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_strings_are_stable() {
        assert_eq!(Stage::ModelInteraction.as_str(), "model_interaction");
        assert_eq!(Stage::ToolExecution.as_str(), "tool_execution");
        assert_eq!(Stage::RunTask.as_str(), "run_task");
        assert_eq!(Stage::CtxCheck.as_str(), "ctx_check");
        assert_eq!(Stage::FinalNoResponses.as_str(), "final_no_responses");
    }

    #[test]
    fn classification_helpers() {
        assert!(CoreError::Interrupted(None).is_cancellation());
        assert!(CoreError::RequestTimeout.is_deadline());
        assert!(CoreError::ToolTimeout.is_deadline());
        assert!(!CoreError::Interrupted(None).is_deadline());
        assert_eq!(
            CoreError::Interrupted(Some(Stage::ToolExecution)).stage(),
            Some(Stage::ToolExecution)
        );
        assert_eq!(CoreError::ToolTimeout.stage(), Some(Stage::ToolExecution));
        assert_eq!(
            CoreError::ModelStream(anyhow::anyhow!("x")).stage(),
            Some(Stage::ModelInteraction)
        );
    }
}
