// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Ordered per-session history of response items.
//!
//! The store enforces the call/output pairing rules: every tool call that
//! enters the history eventually has exactly one output at a later index, and
//! outputs never dangle without their call.  Repairs happen only during
//! normalization, with warnings.

use echo_model::Message;
use tracing::warn;

use crate::items::{ContentItem, FunctionCallOutputPayload, ResponseItem};
use crate::truncate::{
    approx_token_count, formatted_truncate, tool_output_token_limit, truncate, TruncationPolicy,
};

/// Headroom factor over the tool-output budget, covering serialization
/// overhead added when the payload is embedded in a prompt.
const TOOL_OUTPUT_HEADROOM: f64 = 1.2;

#[derive(Debug, Clone, Default)]
pub struct History {
    items: Vec<ResponseItem>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ResponseItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Push items at the tail.  Tool outputs are shaped (truncated) on the
    /// way in; nothing already stored is mutated.
    pub fn append(&mut self, items: impl IntoIterator<Item = ResponseItem>) {
        for mut item in items {
            if let ResponseItem::FunctionCallOutput { output, .. } = &mut item {
                shape_tool_output(output);
            }
            self.items.push(item);
        }
    }

    /// Atomic swap of the full item list (used by compaction).
    pub fn replace(&mut self, items: Vec<ResponseItem>) {
        self.items = items;
    }

    /// Deep copy of the current items.
    pub fn snapshot(&self) -> Vec<ResponseItem> {
        self.items.clone()
    }

    /// The message view sent to the model.  Ghost snapshots are local-only
    /// and never appear here.
    pub fn messages(&self) -> Vec<Message> {
        self.items.iter().filter_map(ResponseItem::to_message).collect()
    }

    pub fn normalize(&mut self) {
        normalize(&mut self.items);
    }

    pub fn remove_first(&mut self) {
        remove_first(&mut self.items);
    }
}

/// Repair pairing in place.
///
/// Calls with a nonempty call id and no later matching output get a
/// placeholder `"aborted"` output inserted immediately after them; outputs
/// with no matching preceding call are dropped.  Both repairs log warnings.
/// Idempotent: a normalized history normalizes to itself.
pub fn normalize(items: &mut Vec<ResponseItem>) {
    let mut i = 0;
    while i < items.len() {
        if let Some(call_id) = items[i].call_id().filter(|id| !id.is_empty()) {
            let has_output = items[i + 1..]
                .iter()
                .any(|it| it.output_call_id() == Some(call_id));
            if !has_output {
                warn!(call_id, "tool call without output; inserting aborted placeholder");
                let placeholder = ResponseItem::FunctionCallOutput {
                    call_id: call_id.to_string(),
                    output: FunctionCallOutputPayload {
                        content: "aborted".to_string(),
                        content_items: None,
                        success: Some(false),
                    },
                };
                items.insert(i + 1, placeholder);
                i += 1;
            }
        }
        i += 1;
    }

    let mut seen_calls: Vec<String> = Vec::new();
    let mut kept = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if let Some(out_id) = item.output_call_id() {
            if !seen_calls.iter().any(|c| c == out_id) {
                warn!(call_id = out_id, "dropping orphan tool output");
                continue;
            }
        }
        if let Some(call_id) = item.call_id() {
            if !call_id.is_empty() {
                seen_calls.push(call_id.to_string());
            }
        }
        kept.push(item);
    }
    *items = kept;
}

/// Pop the head while preserving pairing: removing a call also removes its
/// output, and removing an output also removes its call.
pub fn remove_first(items: &mut Vec<ResponseItem>) {
    if items.is_empty() {
        return;
    }
    let head = items.remove(0);
    let counterpart = if let Some(call_id) = head.call_id().filter(|id| !id.is_empty()) {
        items
            .iter()
            .position(|it| it.output_call_id() == Some(call_id))
    } else if let Some(out_id) = head.output_call_id() {
        items.iter().position(|it| it.call_id() == Some(out_id))
    } else {
        None
    };
    if let Some(pos) = counterpart {
        items.remove(pos);
    }
}

/// Truncate a tool output payload under the token budget from
/// `ECHO_TOOL_OUTPUT_TOKEN_LIMIT`, scaled for serialization headroom.
///
/// `content` is middle-elided as a whole.  `content_items` share one budget:
/// a text item that does not fit the remainder is elided to a snippet, and
/// once the budget is spent the remaining text items collapse into a single
/// `[omitted N text items ...]` marker.  Images pass through untouched.
fn shape_tool_output(output: &mut FunctionCallOutputPayload) {
    let policy = TruncationPolicy::Tokens(tool_output_token_limit()).scaled_by(TOOL_OUTPUT_HEADROOM);
    output.content = formatted_truncate(&output.content, policy);

    let Some(items) = output.content_items.take() else {
        return;
    };
    let budget = match policy {
        TruncationPolicy::Tokens(n) => n as u64,
        TruncationPolicy::Bytes(n) => (n as u64) / 4,
    };
    let mut remaining = budget;
    let mut shaped: Vec<ContentItem> = Vec::with_capacity(items.len());
    let mut iter = items.into_iter().peekable();
    while let Some(item) = iter.next() {
        let Some(text) = item.text() else {
            shaped.push(item);
            continue;
        };
        if remaining == 0 {
            let omitted =
                1 + iter.by_ref().filter(|it| it.text().is_some()).count();
            shaped.push(ContentItem::OutputText {
                text: format!("[omitted {omitted} text items ...]"),
            });
            break;
        }
        let cost = approx_token_count(text);
        if cost <= remaining {
            remaining -= cost;
            shaped.push(item);
        } else {
            let snippet = truncate(text, TruncationPolicy::Tokens(remaining as usize));
            remaining = 0;
            shaped.push(match item {
                ContentItem::InputText { .. } => ContentItem::InputText { text: snippet },
                _ => ContentItem::OutputText { text: snippet },
            });
        }
    }
    output.content_items = Some(shaped);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::FunctionCallOutputPayload;

    fn call(id: &str) -> ResponseItem {
        ResponseItem::FunctionCall {
            id: None,
            name: "shell".into(),
            arguments: "{}".into(),
            call_id: id.into(),
        }
    }

    fn output(id: &str) -> ResponseItem {
        ResponseItem::FunctionCallOutput {
            call_id: id.into(),
            output: FunctionCallOutputPayload {
                content: "ok".into(),
                content_items: None,
                success: Some(true),
            },
        }
    }

    fn paired_ok(items: &[ResponseItem]) -> bool {
        items.iter().enumerate().all(|(i, it)| match it.call_id() {
            Some(id) if !id.is_empty() => items[i + 1..]
                .iter()
                .filter(|o| o.output_call_id() == Some(id))
                .count()
                == 1,
            _ => true,
        }) && items.iter().enumerate().all(|(i, it)| match it.output_call_id() {
            Some(id) => items[..i].iter().any(|c| c.call_id() == Some(id)),
            None => true,
        })
    }

    #[test]
    fn normalize_inserts_aborted_output_after_orphan_call() {
        let mut items = vec![call("c1"), ResponseItem::user_message("next")];
        normalize(&mut items);
        assert_eq!(items.len(), 3);
        match &items[1] {
            ResponseItem::FunctionCallOutput { call_id, output } => {
                assert_eq!(call_id, "c1");
                assert_eq!(output.content, "aborted");
                assert_eq!(output.success, Some(false));
            }
            other => panic!("expected placeholder, got {other:?}"),
        }
        assert!(paired_ok(&items));
    }

    #[test]
    fn normalize_drops_orphan_outputs() {
        let mut items = vec![output("ghost"), call("c1"), output("c1")];
        normalize(&mut items);
        assert_eq!(items.len(), 2);
        assert!(paired_ok(&items));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut items = vec![call("c1"), ResponseItem::user_message("x"), output("nope")];
        normalize(&mut items);
        let once = items.clone();
        normalize(&mut items);
        assert_eq!(items, once);
    }

    #[test]
    fn remove_first_takes_matching_output_along() {
        let mut items = vec![call("c1"), ResponseItem::user_message("mid"), output("c1")];
        remove_first(&mut items);
        assert_eq!(items.len(), 1);
        assert!(items[0].is_message_with_role("user"));
        assert!(paired_ok(&items));
    }

    #[test]
    fn remove_first_on_plain_message_removes_only_it() {
        let mut items = vec![ResponseItem::user_message("a"), call("c1"), output("c1")];
        remove_first(&mut items);
        assert_eq!(items.len(), 2);
        assert!(paired_ok(&items));
    }

    #[test]
    fn remove_first_local_shell_call_removes_its_output() {
        let mut items = vec![
            ResponseItem::LocalShellCall {
                call_id: "s1".into(),
                status: "completed".into(),
                action: serde_json::json!({"command": ["ls"]}),
            },
            output("s1"),
            ResponseItem::user_message("after"),
        ];
        remove_first(&mut items);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn ghost_snapshots_never_reach_the_message_view() {
        let mut h = History::new();
        h.append([
            ResponseItem::user_message("hi"),
            ResponseItem::GhostSnapshot { fields: serde_json::Map::new() },
            ResponseItem::assistant_message("hello"),
        ]);
        let messages = h.messages();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn append_shapes_oversized_tool_output() {
        let big = "x".repeat(100_000);
        let mut h = History::new();
        h.append([ResponseItem::FunctionCallOutput {
            call_id: "c1".into(),
            output: FunctionCallOutputPayload {
                content: big.clone(),
                content_items: None,
                success: Some(true),
            },
        }]);
        match &h.items()[0] {
            ResponseItem::FunctionCallOutput { output, .. } => {
                assert!(output.content.len() < big.len());
                assert!(output.content.contains("tokens truncated"));
                assert!(output.content.starts_with("Total output lines: 1\n\n"));
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn content_items_collapse_into_omitted_marker_when_budget_runs_out() {
        let chunk = "y".repeat(6_000 * 4); // 6000 tokens per item
        let items: Vec<ContentItem> = (0..4)
            .map(|_| ContentItem::OutputText { text: chunk.clone() })
            .collect();
        let mut h = History::new();
        h.append([ResponseItem::FunctionCallOutput {
            call_id: "c1".into(),
            output: FunctionCallOutputPayload {
                content: String::new(),
                content_items: Some(items),
                success: Some(true),
            },
        }]);
        match &h.items()[0] {
            ResponseItem::FunctionCallOutput { output, .. } => {
                let shaped = output.content_items.as_ref().unwrap();
                // First item is elided to the whole budget, the rest collapse.
                assert_eq!(shaped.len(), 2);
                assert!(shaped[0].text().unwrap().contains("tokens truncated"));
                assert_eq!(shaped[1].text().unwrap(), "[omitted 3 text items ...]");
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn small_content_items_pass_untouched() {
        let mut h = History::new();
        h.append([ResponseItem::FunctionCallOutput {
            call_id: "c1".into(),
            output: FunctionCallOutputPayload {
                content: "ok".into(),
                content_items: Some(vec![ContentItem::OutputText { text: "tiny".into() }]),
                success: Some(true),
            },
        }]);
        match &h.items()[0] {
            ResponseItem::FunctionCallOutput { output, .. } => {
                assert_eq!(
                    output.content_items.as_ref().unwrap()[0].text().unwrap(),
                    "tiny"
                );
            }
            other => panic!("unexpected item {other:?}"),
        }
    }
}
