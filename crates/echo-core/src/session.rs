// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use echo_config::SessionDefaults;
use echo_model::Message;

use crate::history::History;
use crate::items::ResponseItem;
use crate::prompt::TurnContext;

/// Per-submission overlay on the session defaults.
#[derive(Debug, Clone, Default)]
pub struct InputContext {
    pub model: Option<String>,
    pub system: Option<String>,
    pub instructions: Option<Vec<String>>,
    pub output_schema: Option<serde_json::Value>,
    pub language: Option<String>,
    pub reasoning_effort: Option<String>,
    pub review_mode: Option<bool>,
    pub attachments: Vec<Message>,
}

/// State owned by one session: its defaults and its history.
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    pub defaults: SessionDefaults,
    pub history: History,
}

impl SessionState {
    pub fn new(id: impl Into<String>, defaults: SessionDefaults) -> Self {
        Self { id: id.into(), defaults, history: History::new() }
    }

    /// Overlay the per-submission context on the session defaults and attach
    /// the current conversation view.
    pub fn turn_context(&self, input: &InputContext) -> TurnContext {
        let d = &self.defaults;
        TurnContext {
            model: input.model.clone().unwrap_or_else(|| d.model.clone()),
            system: input.system.clone().or_else(|| d.system.clone()),
            instructions: input
                .instructions
                .clone()
                .unwrap_or_else(|| d.instructions.clone()),
            output_schema: input.output_schema.clone().or_else(|| d.output_schema.clone()),
            language: input.language.clone().or_else(|| d.language.clone()),
            reasoning_effort: input
                .reasoning_effort
                .clone()
                .or_else(|| d.reasoning_effort.clone()),
            review_mode: input.review_mode.unwrap_or(d.review_mode),
            attachments: input.attachments.clone(),
            history: self.history.messages(),
        }
    }
}

/// All sessions known to a scheduler, guarded by one mutex.
///
/// The lock is held only for the duration of a closure; no awaits happen
/// under it.
pub struct SessionManager {
    defaults: SessionDefaults,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionManager {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self { defaults, sessions: Mutex::new(HashMap::new()) }
    }

    /// Run `f` against the (created-on-first-use) session.
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionState::new(id, self.defaults.clone()));
        f(state)
    }

    pub fn append(&self, id: &str, items: Vec<ResponseItem>) {
        self.with_session(id, |s| s.history.append(items));
    }

    pub fn replace(&self, id: &str, items: Vec<ResponseItem>) {
        self.with_session(id, |s| s.history.replace(items));
    }

    pub fn snapshot(&self, id: &str) -> Vec<ResponseItem> {
        self.with_session(id, |s| s.history.snapshot())
    }

    pub fn messages(&self, id: &str) -> Vec<Message> {
        self.with_session(id, |s| s.history.messages())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SessionDefaults {
        SessionDefaults {
            model: "gpt-5".into(),
            language: Some("en".into()),
            ..SessionDefaults::default()
        }
    }

    #[test]
    fn input_context_overlays_defaults() {
        let s = SessionState::new("sess", defaults());
        let ctx = s.turn_context(&InputContext {
            model: Some("gpt-4.1".into()),
            review_mode: Some(true),
            ..InputContext::default()
        });
        assert_eq!(ctx.model, "gpt-4.1");
        assert!(ctx.review_mode);
        // Unset overlay fields fall back to defaults.
        assert_eq!(ctx.language.as_deref(), Some("en"));
    }

    #[test]
    fn sessions_are_created_on_first_use() {
        let m = SessionManager::new(defaults());
        m.append("a", vec![ResponseItem::user_message("hi")]);
        assert_eq!(m.snapshot("a").len(), 1);
        assert!(m.snapshot("b").is_empty());
    }

    #[test]
    fn replace_swaps_history_atomically() {
        let m = SessionManager::new(defaults());
        m.append("a", vec![ResponseItem::user_message("one")]);
        m.replace("a", vec![ResponseItem::user_message("two")]);
        let items = m.snapshot("a");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message_text().as_deref(), Some("two"));
    }

    #[test]
    fn turn_context_carries_history_messages() {
        let m = SessionManager::new(defaults());
        m.append("a", vec![ResponseItem::user_message("q")]);
        let ctx = m.with_session("a", |s| s.turn_context(&InputContext::default()));
        assert_eq!(ctx.history.len(), 1);
    }
}
