// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Static context-window catalog.
//!
//! Auto-compaction needs to know each model's token capacity.  Exact slugs
//! are checked first, then prefix families; unknown models return `None`,
//! which disables auto-compaction for the session.

/// Environment variable overriding the catalog for every model.
pub const CONTEXT_WINDOW_ENV: &str = "ECHO_MODEL_CONTEXT_WINDOW";

/// Catalog lookup by model slug.
pub fn context_window_for(model: &str) -> Option<u64> {
    match model {
        "gpt-oss-20b" | "gpt-oss-120b" => return Some(96_000),
        "o3" | "o4-mini" | "codex-mini-latest" => return Some(200_000),
        "gpt-4.1" => return Some(1_047_576),
        "gpt-3.5-turbo" => return Some(16_385),
        _ => {}
    }
    if model.starts_with("gpt-4.1-") {
        return Some(1_047_576);
    }
    if model.starts_with("gpt-4o") {
        return Some(128_000);
    }
    if model.starts_with("gpt-5") || model.starts_with("codex-") || model.starts_with("exp-") {
        return Some(272_000);
    }
    None
}

/// Catalog lookup with the `ECHO_MODEL_CONTEXT_WINDOW` override applied.
///
/// The override wins for every model when set to a positive integer;
/// malformed or non-positive values are ignored.
pub fn effective_context_window(model: &str) -> Option<u64> {
    if let Ok(raw) = std::env::var(CONTEXT_WINDOW_ENV) {
        if let Ok(n) = raw.trim().parse::<u64>() {
            if n > 0 {
                return Some(n);
            }
        }
    }
    context_window_for(model)
}

/// Token count at which inline compaction triggers: 90% of the window.
pub fn auto_compact_limit(context_window: u64) -> u64 {
    context_window * 9 / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_slugs_resolve() {
        assert_eq!(context_window_for("gpt-oss-20b"), Some(96_000));
        assert_eq!(context_window_for("gpt-oss-120b"), Some(96_000));
        assert_eq!(context_window_for("o3"), Some(200_000));
        assert_eq!(context_window_for("o4-mini"), Some(200_000));
        assert_eq!(context_window_for("gpt-3.5-turbo"), Some(16_385));
    }

    #[test]
    fn gpt41_family_is_large() {
        assert_eq!(context_window_for("gpt-4.1"), Some(1_047_576));
        assert_eq!(context_window_for("gpt-4.1-mini"), Some(1_047_576));
    }

    #[test]
    fn gpt4o_prefix_matches() {
        assert_eq!(context_window_for("gpt-4o"), Some(128_000));
        assert_eq!(context_window_for("gpt-4o-mini"), Some(128_000));
    }

    #[test]
    fn codex_mini_latest_beats_codex_prefix() {
        assert_eq!(context_window_for("codex-mini-latest"), Some(200_000));
        assert_eq!(context_window_for("codex-large"), Some(272_000));
    }

    #[test]
    fn gpt5_and_exp_prefixes_match() {
        assert_eq!(context_window_for("gpt-5"), Some(272_000));
        assert_eq!(context_window_for("gpt-5-codex"), Some(272_000));
        assert_eq!(context_window_for("gpt-5.1-codex-max"), Some(272_000));
        assert_eq!(context_window_for("exp-runner"), Some(272_000));
    }

    #[test]
    fn unknown_model_is_none() {
        assert_eq!(context_window_for("llama3.2"), None);
    }

    #[test]
    fn auto_compact_limit_is_ninety_percent_floored() {
        assert_eq!(auto_compact_limit(100), 90);
        assert_eq!(auto_compact_limit(16_385), 14_746);
    }
}
