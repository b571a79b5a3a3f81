// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use echo_tools::ToolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One observation on the event queue.
///
/// Every event carries its routing fields and a UTC timestamp; `msg` holds
/// the kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub submission_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(flatten)]
    pub msg: EventMsg,
}

impl Event {
    pub fn new(
        submission_id: impl Into<String>,
        session_id: impl Into<String>,
        msg: EventMsg,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            msg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventMsg {
    /// The submission passed ingress validation and was enqueued.
    #[serde(rename = "submission.accepted")]
    SubmissionAccepted,

    /// Streamed agent text.  The terminal event of a task's output stream
    /// carries `final: true` and the derived final content.
    #[serde(rename = "agent.output")]
    AgentOutput {
        content: String,
        sequence: u64,
        #[serde(rename = "final", default, skip_serializing_if = "std::ops::Not::not")]
        is_final: bool,
    },

    /// A tool-runner event forwarded off the bus, enriched with routing.
    #[serde(rename = "tool.event")]
    ToolEvent { event_type: String, result: ToolResult },

    /// A successful `update_plan` tool result.
    #[serde(rename = "plan.updated")]
    PlanUpdated { plan: Value },

    /// Always the last event of a task.
    #[serde(rename = "task.summary")]
    TaskSummary(TaskSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
    Interrupted,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub status: TaskStatus,
    /// Human-readable closing block.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_reason: String,
    pub exit_stage: String,
    pub duration_ms: u64,
    pub model: String,
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
