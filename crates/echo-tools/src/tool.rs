// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier from the model (forwarded verbatim as `call_id`).
    pub id: String,
    pub name: String,
    /// Normalized JSON argument object.
    pub payload: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self { id: id.into(), name: name.into(), payload }
    }

    /// Build a call from the raw arguments string streamed by the model.
    ///
    /// Arguments that are empty or not valid JSON degrade to `{}`; storing
    /// unparseable text would corrupt every later dispatch of this call.
    pub fn from_arguments(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &str,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        let payload = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(err) => {
                    warn!(
                        tool_name = %name,
                        call_id = %id,
                        error = %err,
                        "tool call arguments are not valid JSON; substituting {{}}"
                    );
                    Value::Object(Default::default())
                }
            }
        };
        Self { id, name, payload }
    }

    /// Canonical wire bytes of the payload.
    pub fn payload_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.payload).unwrap_or_else(|_| b"{}".to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

impl Default for ToolStatus {
    fn default() -> Self {
        ToolStatus::Ok
    }
}

/// The reply of an external tool runner, correlated to a call by `id`.
///
/// Only `id` and `kind` are required; everything else depends on the tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, kind: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            status: ToolStatus::Ok,
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn err(id: impl Into<String>, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            status: ToolStatus::Error,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// True when the runner reported failure in any of the three ways tools
    /// signal it: explicit error status, nonzero exit code, or error text.
    pub fn is_failure(&self) -> bool {
        self.status == ToolStatus::Error
            || self.exit_code.is_some_and(|c| c != 0)
            || self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_arguments_parses_json() {
        let c = ToolCall::from_arguments("t1", "file_read", r#"{"path":"README.md"}"#);
        assert_eq!(c.payload, json!({"path": "README.md"}));
    }

    #[test]
    fn from_arguments_degrades_to_empty_object() {
        let c = ToolCall::from_arguments("t1", "shell", "{broken");
        assert_eq!(c.payload, json!({}));
        let c = ToolCall::from_arguments("t2", "shell", "   ");
        assert_eq!(c.payload, json!({}));
    }

    #[test]
    fn payload_bytes_are_canonical_json() {
        let c = ToolCall::new("t1", "file_read", json!({"path": "README.md"}));
        assert_eq!(c.payload_bytes(), br#"{"path":"README.md"}"#.to_vec());
    }

    #[test]
    fn is_failure_covers_all_three_signals() {
        assert!(!ToolResult::ok("a", "shell", "done").is_failure());
        assert!(ToolResult::err("a", "shell", "boom").is_failure());
        let mut r = ToolResult::ok("a", "command", "out");
        r.exit_code = Some(1);
        assert!(r.is_failure());
        let mut r = ToolResult::ok("a", "command", "out");
        r.exit_code = Some(0);
        assert!(!r.is_failure());
        let mut r = ToolResult::ok("a", "shell", "out");
        r.error = Some("partial failure".into());
        assert!(r.is_failure());
    }

    #[test]
    fn result_round_trips_with_optional_fields() {
        let mut r = ToolResult::ok("t1", "apply_patch", "");
        r.diff = Some("--- a\n+++ b".into());
        r.path = Some("src/lib.rs".into());
        let json = serde_json::to_string(&r).unwrap();
        let back: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.diff.as_deref(), Some("--- a\n+++ b"));
        assert_eq!(back.status, ToolStatus::Ok);
        assert!(back.exit_code.is_none());
    }
}
