// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::json;

use crate::{EventStream, ModelClient, Prompt, StreamEvent, TokenUsage};

/// Deterministic mock client.  Echoes the last user message back.
#[derive(Default)]
pub struct MockClient;

#[async_trait]
impl ModelClient for MockClient {
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
        Ok(format!("MOCK: {}", last_user_text(prompt)))
    }

    async fn stream(&self, prompt: &Prompt) -> anyhow::Result<EventStream> {
        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::TextDelta(format!("MOCK: {}", last_user_text(prompt)))),
            Ok(StreamEvent::Usage(TokenUsage {
                input_tokens: 10,
                cached_input_tokens: 0,
                output_tokens: 10,
            })),
            Ok(StreamEvent::Completed),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

fn last_user_text(prompt: &Prompt) -> String {
    prompt
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, crate::Role::User))
        .and_then(|m| m.as_text())
        .unwrap_or("[no input]")
        .to_string()
}

/// A pre-scripted mock client.
///
/// Each `stream` call pops the next event script; each `complete` call pops
/// the next completion.  Tests specify exact event sequences, including
/// reconstructed tool-call items and mid-stream errors, without network
/// access.  The last prompt of each kind is captured for inspection.
pub struct ScriptedMockClient {
    streams: Mutex<VecDeque<Vec<anyhow::Result<StreamEvent>>>>,
    completions: Mutex<VecDeque<anyhow::Result<String>>>,
    pub last_stream_prompt: Arc<Mutex<Option<Prompt>>>,
    pub last_complete_prompt: Arc<Mutex<Option<Prompt>>>,
}

impl ScriptedMockClient {
    /// Build a client from an ordered list of per-call event scripts.
    pub fn new(scripts: Vec<Vec<anyhow::Result<StreamEvent>>>) -> Self {
        Self {
            streams: Mutex::new(scripts.into_iter().collect()),
            completions: Mutex::new(VecDeque::new()),
            last_stream_prompt: Arc::new(Mutex::new(None)),
            last_complete_prompt: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue a scripted non-streaming completion (for compaction turns).
    pub fn push_completion(&self, result: anyhow::Result<String>) {
        self.completions.lock().unwrap().push_back(result);
    }

    /// Convenience: a single call that streams `text` and completes.
    pub fn always_text(text: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(text)])
    }

    /// A script that emits one text delta, usage, and the terminal marker.
    pub fn text_script(text: impl Into<String>) -> Vec<anyhow::Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::TextDelta(text.into())),
            Ok(StreamEvent::Usage(TokenUsage {
                input_tokens: 5,
                cached_input_tokens: 0,
                output_tokens: 5,
            })),
            Ok(StreamEvent::Completed),
        ]
    }

    /// A script that emits a reconstructed `function_call` item and completes.
    pub fn tool_call_script(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Vec<anyhow::Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::Item(json!({
                "type": "function_call",
                "name": name.into(),
                "arguments": arguments.into(),
                "call_id": call_id.into(),
            }))),
            Ok(StreamEvent::Completed),
        ]
    }

    /// A script whose stream yields an error after `lead_text`.
    pub fn failing_script(lead_text: &str, error: &str) -> Vec<anyhow::Result<StreamEvent>> {
        let mut script: Vec<anyhow::Result<StreamEvent>> = Vec::new();
        if !lead_text.is_empty() {
            script.push(Ok(StreamEvent::TextDelta(lead_text.to_string())));
        }
        script.push(Err(anyhow::anyhow!("{error}")));
        script
    }

    /// Number of stream scripts not yet consumed.
    pub fn remaining_streams(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
        *self.last_complete_prompt.lock().unwrap() = Some(prompt.clone());
        match self.completions.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(String::new()),
        }
    }

    async fn stream(&self, prompt: &Prompt) -> anyhow::Result<EventStream> {
        *self.last_stream_prompt.lock().unwrap() = Some(prompt.clone());
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Ok(StreamEvent::Completed)]);
        Ok(Box::pin(stream::iter(script)))
    }
}
