// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration recognised by the task scheduler.
///
/// All fields have sensible defaults so an empty YAML document (or no
/// document at all) produces a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of submission-queue workers driving tasks in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Wall-clock budget for one turn's tool wait.
    #[serde(default = "default_tool_timeout", with = "duration_str")]
    pub tool_timeout: Duration,
    /// Wall-clock budget for a single model call (one attempt).
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
    /// Retry count for model-call failures that are not transient network
    /// errors.  Transient network failures always get at least five attempts.
    #[serde(default)]
    pub retries: u32,
    /// Fixed delay between model-call attempts.
    #[serde(default = "default_retry_delay", with = "duration_str")]
    pub retry_delay: Duration,
    /// Per-session defaults applied when a submission does not override them.
    #[serde(default)]
    pub defaults: SessionDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tool_timeout: default_tool_timeout(),
            request_timeout: default_request_timeout(),
            retries: 0,
            retry_delay: default_retry_delay(),
            defaults: SessionDefaults::default(),
        }
    }
}

/// Session-level defaults, overlaid by per-submission input context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Model name forwarded to the model client.
    #[serde(default = "default_model")]
    pub model: String,
    /// System prompt override; `None` selects the built-in core prompt.
    /// May be an `@internal/prompts/<name>` reference.
    #[serde(default)]
    pub system: Option<String>,
    /// Additional instruction strings (literal text or internal references).
    #[serde(default)]
    pub instructions: Vec<String>,
    /// JSON schema the final answer must conform to.
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    /// Response language directive, e.g. `"de"` or an internal reference.
    #[serde(default)]
    pub language: Option<String>,
    /// Reasoning effort hint, e.g. `"low"` / `"high"`.  Empty means unset.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// When true the prompt carries the review-mode directive.
    #[serde(default)]
    pub review_mode: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            system: None,
            instructions: Vec::new(),
            output_schema: None,
            language: None,
            reasoning_effort: None,
            review_mode: false,
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_model() -> String {
    "gpt-5".to_string()
}

/// Serde adapter for human-readable durations (`"2m"`, `"30s"`, `"1s 500ms"`).
mod duration_str {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(de)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let c = Config::default();
        assert_eq!(c.workers, 2);
        assert_eq!(c.tool_timeout, Duration::from_secs(120));
        assert_eq!(c.request_timeout, Duration::from_secs(120));
        assert_eq!(c.retries, 0);
        assert_eq!(c.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn durations_parse_from_humantime_strings() {
        let yaml = "tool_timeout: 30s\nrequest_timeout: 5m\nretry_delay: 250ms\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.tool_timeout, Duration::from_secs(30));
        assert_eq!(c.request_timeout, Duration::from_secs(300));
        assert_eq!(c.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn empty_document_uses_all_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.workers, 2);
        assert!(c.defaults.system.is_none());
        assert!(!c.defaults.review_mode);
    }

    #[test]
    fn defaults_section_round_trips() {
        let yaml = "\
defaults:
  model: gpt-4.1
  system: \"@internal/prompts/core\"
  instructions: [\"be terse\"]
  language: de
  review_mode: true
";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.defaults.model, "gpt-4.1");
        assert_eq!(c.defaults.system.as_deref(), Some("@internal/prompts/core"));
        assert_eq!(c.defaults.instructions, vec!["be terse".to_string()]);
        assert_eq!(c.defaults.language.as_deref(), Some("de"));
        assert!(c.defaults.review_mode);
        let text = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.defaults.model, "gpt-4.1");
        assert_eq!(back.tool_timeout, c.tool_timeout);
    }
}
