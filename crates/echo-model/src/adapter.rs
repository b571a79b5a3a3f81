// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::warn;

use crate::{StreamEvent, TokenUsage};

/// Translates the block-based vendor streaming profile into [`StreamEvent`]s.
///
/// Providers in this family stream a tool call as
/// `content_block_start{tool_use}` followed by zero or more
/// `content_block_delta{input_json_delta}` fragments and a
/// `content_block_stop`.  The adapter reassembles the fragments per block
/// index and synthesizes a single `function_call` item once the block closes.
/// Indices still open when the message terminates are flushed in ascending
/// order before `Completed` is emitted.
#[derive(Default)]
pub struct StreamAdapter {
    pending: BTreeMap<u64, PendingToolUse>,
    completed: bool,
}

struct PendingToolUse {
    id: String,
    name: String,
    /// Initial `input` object from `content_block_start`; used only when no
    /// `input_json_delta` fragments arrive for this index.
    initial_input: Value,
    fragments: String,
}

impl PendingToolUse {
    fn into_item(self) -> Value {
        let arguments = if self.fragments.is_empty() {
            let input = if self.initial_input.is_null() { json!({}) } else { self.initial_input };
            input.to_string()
        } else {
            self.fragments
        };
        json!({
            "type": "function_call",
            "name": self.name,
            "arguments": arguments,
            "call_id": self.id,
        })
    }
}

impl StreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw wire event; returns the abstract events it maps to.
    pub fn push(&mut self, raw: &Value) -> Vec<StreamEvent> {
        if self.completed {
            return Vec::new();
        }
        match raw["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let usage = &raw["message"]["usage"];
                if usage.is_object() {
                    vec![StreamEvent::Usage(TokenUsage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                        cached_input_tokens: usage["cache_read_input_tokens"]
                            .as_u64()
                            .unwrap_or(0),
                        output_tokens: 0,
                    })]
                } else {
                    Vec::new()
                }
            }
            "content_block_start" => {
                let block = &raw["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let index = raw["index"].as_u64().unwrap_or(0);
                    self.pending.insert(
                        index,
                        PendingToolUse {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            initial_input: block["input"].clone(),
                            fragments: String::new(),
                        },
                    );
                }
                Vec::new()
            }
            "content_block_delta" => {
                let delta = &raw["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        vec![StreamEvent::TextDelta(text.to_string())]
                    }
                    "input_json_delta" => {
                        let index = raw["index"].as_u64().unwrap_or(0);
                        match self.pending.get_mut(&index) {
                            Some(p) => {
                                p.fragments
                                    .push_str(delta["partial_json"].as_str().unwrap_or_default());
                            }
                            None => warn!(index, "input_json_delta for unknown block index"),
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => {
                let index = raw["index"].as_u64().unwrap_or(0);
                match self.pending.remove(&index) {
                    Some(p) => vec![StreamEvent::Item(p.into_item())],
                    None => Vec::new(),
                }
            }
            "message_delta" => {
                let usage = &raw["usage"];
                if usage.is_object() {
                    vec![StreamEvent::Usage(TokenUsage {
                        input_tokens: 0,
                        cached_input_tokens: 0,
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                    })]
                } else {
                    Vec::new()
                }
            }
            "message_stop" => self.finish(),
            _ => Vec::new(),
        }
    }

    /// Flush all open blocks in ascending index order and terminate.
    ///
    /// Called on `message_stop` and by drivers when the wire stream ends
    /// without one.  Idempotent: later calls return nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.completed {
            return Vec::new();
        }
        self.completed = true;
        let pending = std::mem::take(&mut self.pending);
        let mut out: Vec<StreamEvent> = pending
            .into_values()
            .map(|p| StreamEvent::Item(p.into_item()))
            .collect();
        out.push(StreamEvent::Completed);
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
