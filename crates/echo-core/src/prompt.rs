// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Prompt assembly: layering system text, instructions, attachments and
//! history into one model request.

use echo_model::{Message, Prompt, ToolSchema};
use serde_json::Value;

use crate::prompts;

/// Everything a turn needs to build its prompt.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub model: String,
    /// System prompt text or internal reference; `None` selects the built-in.
    pub system: Option<String>,
    /// Instruction strings (literal or internal references).
    pub instructions: Vec<String>,
    pub output_schema: Option<Value>,
    pub language: Option<String>,
    pub reasoning_effort: Option<String>,
    pub review_mode: bool,
    /// Extra messages passed through verbatim between instructions and history.
    pub attachments: Vec<Message>,
    /// The session's conversation view.
    pub history: Vec<Message>,
}

/// Assemble the prompt layers in their fixed order, omitting empty ones.
pub fn build_prompt(ctx: &TurnContext, tools: Vec<ToolSchema>) -> Prompt {
    let mut messages: Vec<Message> = Vec::new();

    let system_text = resolve_system(ctx.system.as_deref());
    let instructions = resolve_instructions(ctx);

    // 1. Reasoning-effort directive, unless something upstream already set one.
    if let Some(effort) = ctx.reasoning_effort.as_deref().filter(|e| !e.is_empty()) {
        let already = contains_marker(&system_text, &instructions, &ctx.history, prompts::REASONING_EFFORT_PREFIX);
        if !already {
            messages.push(Message::system(prompts::reasoning_effort_directive(effort)));
        }
    }

    // 2. Review-mode directive.
    if ctx.review_mode {
        messages.push(Message::system(prompts::REVIEW_MODE_DIRECTIVE));
    }

    // 3. System prompt.
    messages.push(Message::system(system_text.clone()));

    // 4. Instructions, joined into one message.
    if !instructions.is_empty() {
        messages.push(Message::system(instructions.join("\n")));
    }

    // 5. Attachments verbatim.
    messages.extend(ctx.attachments.iter().cloned());

    // 6. Conversation history.
    messages.extend(ctx.history.iter().cloned());

    // 7. Trailing language directive, unless already embedded upstream.
    if let Some(language) = ctx.language.as_deref().filter(|l| !l.is_empty()) {
        let directive = prompts::language_directive(language);
        let already = messages
            .iter()
            .filter_map(Message::as_text)
            .any(|t| t.contains(&directive));
        if !already {
            messages.push(Message::system(directive));
        }
    }

    Prompt {
        model: ctx.model.clone(),
        messages,
        tools,
        parallel_tool_calls: true,
        output_schema: ctx.output_schema.clone(),
    }
}

fn resolve_system(system: Option<&str>) -> String {
    system
        .filter(|s| !s.is_empty())
        .and_then(prompts::resolve)
        .unwrap_or_else(|| prompts::CORE_SYSTEM_PROMPT.to_string())
}

/// Resolve instruction strings: internal references expand or drop, language
/// prompts are filtered out (the trailing directive handles them), and the
/// output-schema instruction is appended last when nothing upstream set one.
fn resolve_instructions(ctx: &TurnContext) -> Vec<String> {
    let mut resolved: Vec<String> = ctx
        .instructions
        .iter()
        .filter(|raw| !prompts::is_language_prompt(raw))
        .filter_map(|raw| prompts::resolve(raw))
        .filter(|text| !text.is_empty())
        .collect();

    if let Some(schema) = ctx.output_schema.as_ref().filter(|s| !s.is_null()) {
        let prefix = prompts::OUTPUT_SCHEMA_PREFIX;
        let in_instructions = resolved.iter().any(|i| i.starts_with(prefix));
        let in_history = ctx
            .history
            .iter()
            .filter_map(Message::as_text)
            .any(|t| t.starts_with(prefix));
        if !in_instructions && !in_history {
            resolved.push(format!("{prefix}{schema}"));
        }
    }
    resolved
}

fn contains_marker(
    system_text: &str,
    instructions: &[String],
    history: &[Message],
    marker: &str,
) -> bool {
    system_text.contains(marker)
        || instructions.iter().any(|i| i.contains(marker))
        || history
            .iter()
            .filter_map(Message::as_text)
            .any(|t| t.contains(marker))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
