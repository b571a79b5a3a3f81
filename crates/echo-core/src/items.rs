// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Response items: the tagged units a conversation history is made of.

use echo_model::{Message, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical event in conversation history.
///
/// Encoded with an external `type` tag and variant payload fields at the same
/// JSON depth, so every variant round-trips through its wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        role: String,
        content: Vec<ContentItem>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: FunctionCallOutputPayload,
    },
    LocalShellCall {
        call_id: String,
        status: String,
        action: Value,
    },
    WebSearchCall {
        #[serde(flatten)]
        fields: serde_json::Map<String, Value>,
    },
    /// Opaque local rollback pointer.  Retained in history, never prompted.
    GhostSnapshot {
        #[serde(flatten)]
        fields: serde_json::Map<String, Value>,
    },
    CompactionSummary {
        #[serde(flatten)]
        fields: serde_json::Map<String, Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    InputText { text: String },
    InputImage { image_url: String },
    OutputText { text: String },
}

impl ContentItem {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentItem::InputText { text } | ContentItem::OutputText { text } => Some(text),
            ContentItem::InputImage { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutputPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_items: Option<Vec<ContentItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ResponseItem {
    pub fn user_message(text: impl Into<String>) -> Self {
        ResponseItem::Message {
            role: "user".to_string(),
            content: vec![ContentItem::InputText { text: text.into() }],
        }
    }

    pub fn assistant_message(text: impl Into<String>) -> Self {
        ResponseItem::Message {
            role: "assistant".to_string(),
            content: vec![ContentItem::OutputText { text: text.into() }],
        }
    }

    /// The call id when this item *requests* a tool execution.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            ResponseItem::FunctionCall { call_id, .. }
            | ResponseItem::LocalShellCall { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// The call id when this item *answers* a tool execution.
    pub fn output_call_id(&self) -> Option<&str> {
        match self {
            ResponseItem::FunctionCallOutput { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Concatenated text of a `message` item.
    pub fn message_text(&self) -> Option<String> {
        match self {
            ResponseItem::Message { content, .. } => Some(
                content
                    .iter()
                    .filter_map(ContentItem::text)
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            _ => None,
        }
    }

    pub fn is_message_with_role(&self, wanted: &str) -> bool {
        matches!(self, ResponseItem::Message { role, .. } if role == wanted)
    }

    /// Map this item onto the flat message view fed to the prompt builder.
    ///
    /// Ghost snapshots, reasoning, and the opaque variants have no message
    /// form and yield `None`.
    pub fn to_message(&self) -> Option<Message> {
        match self {
            ResponseItem::Message { role, .. } => {
                let role = match role.as_str() {
                    "system" => Role::System,
                    "assistant" => Role::Assistant,
                    _ => Role::User,
                };
                let text = self.message_text().unwrap_or_default();
                Some(Message { role, content: echo_model::MessageContent::Text(text) })
            }
            ResponseItem::FunctionCall { name, arguments, call_id, .. } => {
                Some(Message::tool_call(call_id.clone(), name.clone(), arguments.clone()))
            }
            ResponseItem::LocalShellCall { call_id, action, .. } => {
                Some(Message::tool_call(call_id.clone(), "local_shell", action.to_string()))
            }
            ResponseItem::FunctionCallOutput { call_id, output } => Some(Message::tool_result(
                call_id.clone(),
                output.content.clone(),
                !output.success.unwrap_or(true),
            )),
            _ => None,
        }
    }
}

/// A response item together with the input (if any) the next turn feeds back.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedResponseItem {
    pub item: ResponseItem,
    pub response: Option<ResponseInputItem>,
}

/// Input fed back to the next turn after tool execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseInputItem {
    FunctionCallOutput {
        call_id: String,
        output: FunctionCallOutputPayload,
    },
}

impl From<ResponseInputItem> for ResponseItem {
    fn from(value: ResponseInputItem) -> Self {
        match value {
            ResponseInputItem::FunctionCallOutput { call_id, output } => {
                ResponseItem::FunctionCallOutput { call_id, output }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
