// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Inline auto-compaction: rewrite old history into a model-produced summary
//! when the prompt approaches the context window.

use std::sync::Arc;

use echo_model::{Message, ModelClient};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::history::{normalize, remove_first};
use crate::items::ResponseItem;
use crate::prompt::{build_prompt, TurnContext};
use crate::prompts::{COMPACT_DIRECTIVE, SUMMARY_PREFIX};
use crate::truncate::{approx_token_count, approx_tokens_for_prompt, truncate, TruncationPolicy};

/// Token budget for the verbatim tail of user messages kept after compaction.
const TAIL_TOKEN_BUDGET: u64 = 20_000;

/// Leading user messages carrying these markers pin the session environment
/// and survive compaction verbatim.
const SESSION_PREFIX_MARKERS: &[&str] = &[
    "<environment_context>",
    "# agents.md instructions for ",
    "<user_shell_command>",
];

/// Produce the compacted replacement for `history`.
///
/// The model is asked (non-streaming) for a handoff summary of the cloned,
/// normalized history; the new history keeps the session-prefix messages, a
/// token-budgeted tail of recent user messages, the summary, and any ghost
/// snapshot.  Fails with [`CoreError::ContextWindowTooSmallForCompaction`]
/// when even a single-item history cannot fit the compaction prompt.
pub async fn run_inline_compaction(
    client: &Arc<dyn ModelClient>,
    ctx: &TurnContext,
    history: Vec<ResponseItem>,
    context_window: u64,
) -> Result<Vec<ResponseItem>, CoreError> {
    let mut full = history;
    normalize(&mut full);

    // Trim the compaction prompt itself under the window, dropping oldest
    // items pair-wise until it fits.
    let mut trimmed = full.clone();
    let prompt = loop {
        let prompt = compaction_prompt(ctx, &trimmed);
        if approx_tokens_for_prompt(&prompt) <= context_window {
            break prompt;
        }
        if trimmed.len() <= 1 {
            return Err(CoreError::ContextWindowTooSmallForCompaction);
        }
        remove_first(&mut trimmed);
    };

    let suffix = client
        .complete(&prompt)
        .await
        .map_err(CoreError::ModelStream)?;
    let summary = format!("{SUMMARY_PREFIX}\n{suffix}");

    // Recompose: prefix + budgeted tail + summary (+ ghost snapshot).
    let mut next: Vec<ResponseItem> = Vec::new();
    let mut tail_candidates: Vec<String> = Vec::new();
    for item in &full {
        if !item.is_message_with_role("user") {
            continue;
        }
        let text = item.message_text().unwrap_or_default();
        if is_session_prefix(&text) {
            next.push(item.clone());
        } else if !text.starts_with(SUMMARY_PREFIX) {
            tail_candidates.push(text);
        }
    }
    next.extend(select_tail(&tail_candidates).into_iter().map(ResponseItem::user_message));
    next.push(ResponseItem::user_message(summary));

    if let Some(ghost) = full
        .iter()
        .rev()
        .find(|i| matches!(i, ResponseItem::GhostSnapshot { .. }))
    {
        next.push(ghost.clone());
    }

    info!(
        items_before = full.len(),
        items_after = next.len(),
        "history compacted"
    );
    Ok(next)
}

/// The same turn context, with the cloned history and the compact directive
/// as the final message.
fn compaction_prompt(ctx: &TurnContext, items: &[ResponseItem]) -> echo_model::Prompt {
    let mut history: Vec<Message> = items.iter().filter_map(ResponseItem::to_message).collect();
    history.push(Message::user(COMPACT_DIRECTIVE));
    let compact_ctx = TurnContext { history, ..ctx.clone() };
    build_prompt(&compact_ctx, Vec::new())
}

fn is_session_prefix(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SESSION_PREFIX_MARKERS.iter().any(|m| lowered.starts_with(m))
}

/// Walk candidates from the end under [`TAIL_TOKEN_BUDGET`]; the last message
/// included is middle-truncated to exactly fit.  Returns natural order.
fn select_tail(candidates: &[String]) -> Vec<String> {
    let mut remaining = TAIL_TOKEN_BUDGET;
    let mut reversed: Vec<String> = Vec::new();
    for text in candidates.iter().rev() {
        if remaining == 0 {
            break;
        }
        let cost = approx_token_count(text);
        if cost <= remaining {
            remaining -= cost;
            reversed.push(text.clone());
        } else {
            reversed.push(truncate(text, TruncationPolicy::Tokens(remaining as usize)));
            remaining = 0;
        }
    }
    if reversed.is_empty() && !candidates.is_empty() {
        warn!("tail budget excluded every recent user message");
    }
    reversed.reverse();
    reversed
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use echo_model::ScriptedMockClient;
    use serde_json::Map;

    fn ctx() -> TurnContext {
        TurnContext { model: "gpt-5".into(), ..TurnContext::default() }
    }

    fn client_with_summary(text: &str) -> Arc<dyn ModelClient> {
        let c = ScriptedMockClient::new(vec![]);
        c.push_completion(Ok(text.to_string()));
        Arc::new(c)
    }

    #[tokio::test]
    async fn summary_replaces_history_and_keeps_prefix() {
        let history = vec![
            ResponseItem::user_message("<environment_context>os=linux</environment_context>"),
            ResponseItem::user_message("do the thing"),
            ResponseItem::assistant_message("working on it"),
            ResponseItem::user_message("and another thing"),
        ];
        let client = client_with_summary("Work done: both things");
        let next = run_inline_compaction(&client, &ctx(), history, 1_000_000)
            .await
            .unwrap();

        assert!(next[0]
            .message_text()
            .unwrap()
            .starts_with("<environment_context>"));
        assert_eq!(next[1].message_text().as_deref(), Some("do the thing"));
        assert_eq!(next[2].message_text().as_deref(), Some("and another thing"));
        let summary = next[3].message_text().unwrap();
        assert!(summary.starts_with(SUMMARY_PREFIX));
        assert!(summary.ends_with("Work done: both things"));
        assert_eq!(next.len(), 4);
    }

    #[tokio::test]
    async fn previous_summary_is_not_carried_into_the_tail() {
        let history = vec![
            ResponseItem::user_message(format!("{SUMMARY_PREFIX}\nolder summary")),
            ResponseItem::user_message("fresh question"),
        ];
        let client = client_with_summary("newer summary");
        let next = run_inline_compaction(&client, &ctx(), history, 1_000_000)
            .await
            .unwrap();
        let texts: Vec<String> = next.iter().filter_map(|i| i.message_text()).collect();
        assert_eq!(
            texts.iter().filter(|t| t.starts_with(SUMMARY_PREFIX)).count(),
            1,
            "only the new summary survives: {texts:?}"
        );
    }

    #[tokio::test]
    async fn ghost_snapshot_is_reappended_last() {
        let mut fields = Map::new();
        fields.insert("ref".into(), serde_json::json!("snap-9"));
        let history = vec![
            ResponseItem::user_message("q"),
            ResponseItem::GhostSnapshot { fields },
        ];
        let client = client_with_summary("s");
        let next = run_inline_compaction(&client, &ctx(), history, 1_000_000)
            .await
            .unwrap();
        assert!(matches!(next.last(), Some(ResponseItem::GhostSnapshot { .. })));
    }

    #[tokio::test]
    async fn single_item_overflow_fails_with_sentinel() {
        let history = vec![ResponseItem::user_message("x".repeat(4_000))];
        let client = client_with_summary("unused");
        let err = run_inline_compaction(&client, &ctx(), history, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ContextWindowTooSmallForCompaction));
    }

    #[tokio::test]
    async fn oversized_history_is_trimmed_pairwise_before_the_model_call() {
        // Six items; window fits only a few. The compaction prompt must be
        // trimmed from the head until it fits, keeping call/output pairs.
        let history = vec![
            ResponseItem::user_message("a".repeat(2_000)),
            ResponseItem::FunctionCall {
                id: None,
                name: "shell".into(),
                arguments: "{}".into(),
                call_id: "c1".into(),
            },
            ResponseItem::FunctionCallOutput {
                call_id: "c1".into(),
                output: crate::items::FunctionCallOutputPayload {
                    content: "b".repeat(2_000),
                    content_items: None,
                    success: Some(true),
                },
            },
            ResponseItem::user_message("recent question"),
            ResponseItem::assistant_message("recent answer"),
            ResponseItem::user_message("final question"),
        ];
        let client = client_with_summary("trimmed fine");
        let next = run_inline_compaction(&client, &ctx(), history, 1_000)
            .await
            .unwrap();
        // Recomposition still sees the full user tail (it works on the
        // untrimmed clone), and the summary lands before any ghost items.
        let texts: Vec<String> = next.iter().filter_map(|i| i.message_text()).collect();
        assert!(texts.iter().any(|t| t == "final question"));
        assert!(texts.last().unwrap().starts_with(SUMMARY_PREFIX));
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_error() {
        let c = ScriptedMockClient::new(vec![]);
        c.push_completion(Err(anyhow::anyhow!("rate limited")));
        let client: Arc<dyn ModelClient> = Arc::new(c);
        let err = run_inline_compaction(
            &client,
            &ctx(),
            vec![ResponseItem::user_message("q")],
            1_000_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::ModelStream(_)));
    }

    #[test]
    fn tail_selection_truncates_the_last_included_message() {
        let big = "z".repeat((TAIL_TOKEN_BUDGET as usize) * 4 * 2);
        let candidates = vec!["early".to_string(), big];
        let tail = select_tail(&candidates);
        // The huge newest message consumes the whole budget (middle-elided);
        // the earlier message no longer fits.
        assert_eq!(tail.len(), 1);
        assert!(tail[0].contains("tokens truncated"));
    }

    #[test]
    fn session_prefix_matching_is_case_insensitive() {
        assert!(is_session_prefix("<ENVIRONMENT_CONTEXT>x"));
        assert!(is_session_prefix("# AGENTS.md instructions for repo"));
        assert!(is_session_prefix("<user_shell_command>ls"));
        assert!(!is_session_prefix("regular message"));
    }
}
