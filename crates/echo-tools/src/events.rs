use serde::{Deserialize, Serialize};

use crate::{ToolCall, ToolResult};

/// Bus event type marking the start of a tool execution.
pub const ITEM_STARTED: &str = "item.started";
/// Bus event type marking terminal completion of a tool execution.
pub const ITEM_COMPLETED: &str = "item.completed";

/// Progress or completion report published by a tool runner.
///
/// `event_type` is an open set; the core only acts on [`ITEM_COMPLETED`] and
/// forwards everything else untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub result: ToolResult,
}

impl ToolEvent {
    pub fn completed(result: ToolResult) -> Self {
        Self { event_type: ITEM_COMPLETED.to_string(), result }
    }

    pub fn started(result: ToolResult) -> Self {
        Self { event_type: ITEM_STARTED.to_string(), result }
    }

    pub fn is_completed(&self) -> bool {
        self.event_type == ITEM_COMPLETED
    }
}

/// A tool invocation published by the core for an external runner to pick up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub submission_id: String,
    pub session_id: String,
    pub call: ToolCall,
}

/// Decision for a runner that gated execution behind an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approval_id: String,
    pub approved: bool,
}
