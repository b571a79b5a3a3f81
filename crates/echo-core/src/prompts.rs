// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Built-in prompt library and `@internal/prompts/<name>` resolution.

/// Prefix marking a reference into the built-in prompt library.
pub const INTERNAL_PROMPT_PREFIX: &str = "@internal/prompts/";

/// Default system prompt when the session provides none.
pub const CORE_SYSTEM_PROMPT: &str = "\
You are an interactive agent. You answer the user directly, call the \
available tools when a task needs them, and continue working after tool \
results arrive until the task is complete. Keep responses concise and \
grounded in the tool output you actually received.";

/// Directive appended when review mode is enabled for the session.
pub const REVIEW_MODE_DIRECTIVE: &str = "\
Review mode is active: examine the provided changes critically, report \
defects with file and line references, and do not modify anything.";

/// Final message of a compaction prompt: ask the model for a handoff summary.
pub const COMPACT_DIRECTIVE: &str = "\
Stop working on the current task. Instead, write a handoff summary of this \
conversation for an agent that will continue without access to it. Record \
the user's goals, every decision made, files and commands involved, results \
obtained so far, and what remains to be done. Be specific and information- \
dense; do not add pleasantries.";

/// Prepended to the model-produced summary when history is recomposed.
pub const SUMMARY_PREFIX: &str =
    "[Conversation summary: earlier turns were compacted to free context]";

/// Prefix of the instruction that pins the answer to a JSON schema.
pub const OUTPUT_SCHEMA_PREFIX: &str =
    "Your final answer must be valid JSON conforming to this schema: ";

/// Prefix of the reasoning-effort directive.
pub const REASONING_EFFORT_PREFIX: &str = "Reasoning effort: ";

/// Prefix of the response-language directive.
pub const LANGUAGE_DIRECTIVE_PREFIX: &str = "Respond in the following language: ";

pub fn reasoning_effort_directive(effort: &str) -> String {
    format!("{REASONING_EFFORT_PREFIX}{effort}")
}

pub fn language_directive(language: &str) -> String {
    format!("{LANGUAGE_DIRECTIVE_PREFIX}{language}")
}

/// Resolve an `@internal/prompts/<name>` reference.
///
/// Non-reference strings resolve to themselves; unknown internal names
/// resolve to `None` so callers can drop them.
pub fn resolve(reference: &str) -> Option<String> {
    let Some(name) = reference.strip_prefix(INTERNAL_PROMPT_PREFIX) else {
        return Some(reference.to_string());
    };
    match name {
        "core" => Some(CORE_SYSTEM_PROMPT.to_string()),
        "compact" => Some(COMPACT_DIRECTIVE.to_string()),
        "review" => Some(REVIEW_MODE_DIRECTIVE.to_string()),
        _ => name
            .strip_prefix("language/")
            .map(language_directive),
    }
}

/// True when the text is (or begins with) a language directive.
pub fn is_language_prompt(text: &str) -> bool {
    text.starts_with(LANGUAGE_DIRECTIVE_PREFIX)
        || text
            .strip_prefix(INTERNAL_PROMPT_PREFIX)
            .is_some_and(|name| name.starts_with("language/"))
}
