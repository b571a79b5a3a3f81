// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Stream collector: folds model stream events into text, response items and
//! tool calls.
//!
//! The collector is single-writer (only the task driving the stream pushes
//! events) and buffers everything before the first visible progress so that
//! providers emitting usage/metadata ahead of real content do not produce a
//! burst of empty updates.

use std::collections::HashSet;

use echo_model::{StreamEvent, TokenUsage};
use echo_tools::ToolCall;
use serde_json::Value;
use tracing::warn;

use crate::items::ResponseItem;

#[derive(Default)]
pub struct Collector {
    pending: Vec<StreamEvent>,
    progressed: bool,
    completed: bool,
    text: String,
    items: Vec<ResponseItem>,
    calls: Vec<ToolCall>,
    seen_call_ids: HashSet<String>,
    usage: TokenUsage,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream event.  Returns the text deltas that became visible,
    /// in arrival order.
    pub fn push(&mut self, event: StreamEvent) -> Vec<String> {
        if self.completed {
            return Vec::new();
        }
        let makes_progress = match &event {
            StreamEvent::TextDelta(t) => !t.is_empty(),
            StreamEvent::Item(v) => !v.is_null(),
            _ => false,
        };
        let terminal = matches!(event, StreamEvent::Completed);

        if !self.progressed && !makes_progress && !terminal {
            self.pending.push(event);
            return Vec::new();
        }

        let mut deltas = Vec::new();
        if makes_progress || terminal {
            for buffered in std::mem::take(&mut self.pending) {
                self.apply(buffered, &mut deltas);
            }
            self.progressed = true;
        }
        self.apply(event, &mut deltas);
        deltas
    }

    fn apply(&mut self, event: StreamEvent, deltas: &mut Vec<String>) {
        match event {
            StreamEvent::TextDelta(t) => {
                if !t.is_empty() {
                    self.text.push_str(&t);
                    deltas.push(t);
                }
            }
            StreamEvent::Item(raw) => self.apply_item(raw),
            StreamEvent::Usage(u) => self.usage.add(&u),
            StreamEvent::Completed => self.completed = true,
        }
    }

    fn apply_item(&mut self, raw: Value) {
        if raw.is_null() {
            return;
        }
        let item: ResponseItem = match serde_json::from_value(raw) {
            Ok(item) => item,
            Err(err) => {
                warn!(error = %err, "unparseable stream item; skipping");
                return;
            }
        };
        if let ResponseItem::FunctionCall { name, arguments, call_id, .. } = &item {
            if !name.is_empty() && !call_id.is_empty() {
                if !self.seen_call_ids.insert(call_id.clone()) {
                    // Second arrival for the same call id is ignored.
                    return;
                }
                self.calls.push(ToolCall::from_arguments(call_id, name, arguments));
            }
        }
        self.items.push(item);
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Full text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn items(&self) -> &[ResponseItem] {
        &self.items
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn into_parts(self) -> (String, Vec<ResponseItem>, Vec<ToolCall>, TokenUsage) {
        (self.text, self.items, self.calls, self.usage)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
