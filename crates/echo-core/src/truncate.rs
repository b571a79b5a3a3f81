// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Approximate token accounting and UTF-8-safe middle elision.

use echo_model::Prompt;

/// Environment variable for the tool-output truncation budget (tokens).
pub const TOOL_OUTPUT_TOKEN_LIMIT_ENV: &str = "ECHO_TOOL_OUTPUT_TOKEN_LIMIT";

/// Default tool-output truncation budget when the env var is absent.
pub const DEFAULT_TOOL_OUTPUT_TOKEN_LIMIT: usize = 2500;

/// Resolve the tool-output token budget from the environment.
pub fn tool_output_token_limit() -> usize {
    std::env::var(TOOL_OUTPUT_TOKEN_LIMIT_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_TOOL_OUTPUT_TOKEN_LIMIT)
}

/// ⌈bytes / 4⌉, the 4-bytes-per-token heuristic.  Empty input is 0.
pub fn approx_token_count(s: &str) -> u64 {
    (s.len() as u64).div_ceil(4)
}

/// Token estimate for a whole prompt: canonical-JSON byte length / 4, falling
/// back to summing per-field estimates when serialization fails.
pub fn approx_tokens_for_prompt(prompt: &Prompt) -> u64 {
    match serde_json::to_vec(prompt) {
        Ok(bytes) => (bytes.len() as u64).div_ceil(4),
        Err(_) => {
            let mut total = approx_token_count(&prompt.model);
            for m in &prompt.messages {
                total += match &m.content {
                    echo_model::MessageContent::Text(t) => approx_token_count(t),
                    echo_model::MessageContent::ToolCall { function, .. } => {
                        approx_token_count(&function.name)
                            + approx_token_count(&function.arguments)
                    }
                    echo_model::MessageContent::ToolResult { content, .. } => {
                        approx_token_count(content)
                    }
                };
            }
            for t in &prompt.tools {
                total += approx_token_count(&t.name)
                    + approx_token_count(&t.description)
                    + approx_token_count(&t.parameters.to_string());
            }
            total
        }
    }
}

/// Bounds how much of a text survives [`truncate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Exact byte budget.
    Bytes(usize),
    /// Token budget, approximated as 4 bytes per token.
    Tokens(usize),
}

impl TruncationPolicy {
    pub fn byte_budget(&self) -> usize {
        match self {
            TruncationPolicy::Bytes(n) => *n,
            TruncationPolicy::Tokens(n) => n.saturating_mul(4),
        }
    }

    /// Scale the budget by a nonnegative factor, rounding up.
    pub fn scaled_by(self, factor: f64) -> Self {
        let factor = factor.max(0.0);
        let scale = |n: usize| (n as f64 * factor).ceil() as usize;
        match self {
            TruncationPolicy::Bytes(n) => TruncationPolicy::Bytes(scale(n)),
            TruncationPolicy::Tokens(n) => TruncationPolicy::Tokens(scale(n)),
        }
    }
}

/// Middle-elide `content` so that the retained text fits the policy's byte
/// budget.  Codepoints are never split; the elision marker counts the removed
/// units (tokens for a token policy, codepoints for a byte policy).
pub fn truncate(content: &str, policy: TruncationPolicy) -> String {
    let budget = policy.byte_budget();
    if content.len() <= budget {
        return content.to_string();
    }

    let left = budget / 2;
    let right = budget - left;

    let mut prefix_end = left.min(content.len());
    while !content.is_char_boundary(prefix_end) {
        prefix_end -= 1;
    }
    let mut suffix_start = content.len() - right.min(content.len());
    while !content.is_char_boundary(suffix_start) {
        suffix_start += 1;
    }

    let removed = &content[prefix_end..suffix_start];
    let marker = match policy {
        TruncationPolicy::Tokens(_) => {
            format!("…{} tokens truncated…", approx_token_count(removed))
        }
        TruncationPolicy::Bytes(_) => {
            format!("…{} chars truncated…", removed.chars().count())
        }
    };

    let mut out = String::with_capacity(prefix_end + marker.len() + (content.len() - suffix_start));
    out.push_str(&content[..prefix_end]);
    out.push_str(&marker);
    out.push_str(&content[suffix_start..]);
    out
}

/// Like [`truncate`], but prepends a line-count header when elision occurred.
/// Content that fits is returned byte-for-byte unchanged.
pub fn formatted_truncate(content: &str, policy: TruncationPolicy) -> String {
    if content.len() <= policy.byte_budget() {
        return content.to_string();
    }
    format!(
        "Total output lines: {}\n\n{}",
        line_count(content),
        truncate(content, policy)
    )
}

/// Count of `\n`-separated lines; empty input has zero lines and a trailing
/// newline does not create an extra one.
fn line_count(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    s.strip_suffix('\n').unwrap_or(s).split('\n').count()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
