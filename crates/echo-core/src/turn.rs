// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! One turn: prompt → stream → identify tools → dispatch → await → record.

use std::collections::HashSet;
use std::sync::Arc;

use echo_config::Config;
use echo_model::{ModelClient, Prompt, TokenUsage, ToolSchema};
use echo_tools::{BusMessage, DispatchRequest, ToolBus, ToolCall, ToolResult};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::collector::Collector;
use crate::dispatch::{await_results, CallContext, CallContextRegistry};
use crate::error::CoreError;
use crate::events::{Event, EventMsg};
use crate::items::{FunctionCallOutputPayload, ProcessedResponseItem, ResponseInputItem, ResponseItem};
use crate::prompt::{build_prompt, TurnContext};
use crate::truncate::{truncate, TruncationPolicy};

/// Minimum attempt budget for transient network failures.
const MIN_NETWORK_RETRIES: u32 = 5;

/// Case-insensitive marker of a retryable transport failure.
const NETWORK_FAILURE_MARKER: &str = "internal network failure";

/// Tool kinds whose output is wrapped in a small JSON envelope.
const COMMAND_KIND: &str = "command";

/// Tool kind that drives `plan.updated` events.
const UPDATE_PLAN_KIND: &str = "update_plan";

pub struct TurnOutput {
    /// Everything this turn produced, in record order.
    pub items: Vec<ProcessedResponseItem>,
    /// Derived final content: last assistant message, else the full stream text.
    pub final_text: String,
    pub usage: TokenUsage,
    /// Count of tool responses produced; zero means the turn was final.
    pub tool_responses: usize,
}

/// Per-task state threaded through consecutive turns.
pub struct TurnRunner<'a> {
    pub config: &'a Config,
    pub client: &'a Arc<dyn ModelClient>,
    pub bus: &'a ToolBus,
    pub registry: &'a Arc<CallContextRegistry>,
    pub eq_tx: &'a mpsc::Sender<Event>,
    pub cancel: &'a CancelToken,
    pub submission_id: &'a str,
    pub session_id: &'a str,
    /// Monotonic `agent.output` sequence, scoped to the task.
    pub sequence: &'a mut u64,
    /// `(name, call_id)` pairs already published by this task.
    pub published: &'a mut HashSet<(String, String)>,
    /// Tool schemas advertised to the model.
    pub tools: &'a [ToolSchema],
}

enum AttemptError {
    Timeout,
    Stream(anyhow::Error),
}

impl<'a> TurnRunner<'a> {
    pub async fn run(
        &mut self,
        ctx: &TurnContext,
        bus_rx: &mut broadcast::Receiver<BusMessage>,
    ) -> Result<TurnOutput, CoreError> {
        // Phase 1: model interaction.
        let prompt = build_prompt(ctx, self.tools.to_vec());
        let collector = self.stream_with_retries(&prompt).await?;
        let (full_text, emitted, calls, usage) = collector.into_parts();

        // Phase 2: tool identification.
        let has_assistant = emitted.iter().any(|i| i.is_message_with_role("assistant"));
        let mut items: Vec<ProcessedResponseItem> = emitted
            .into_iter()
            .map(|item| ProcessedResponseItem { item, response: None })
            .collect();
        if !full_text.is_empty() && !has_assistant {
            items.push(ProcessedResponseItem {
                item: ResponseItem::assistant_message(full_text.clone()),
                response: None,
            });
        }

        // Phase 3: tool routing.
        let mut dispatched: Vec<ToolCall> = Vec::new();
        for call in calls {
            if call.name.is_empty() || call.id.is_empty() {
                continue;
            }
            if !self.published.insert((call.name.clone(), call.id.clone())) {
                continue;
            }
            self.registry.insert(
                call.id.clone(),
                CallContext {
                    submission_id: self.submission_id.to_string(),
                    session_id: self.session_id.to_string(),
                    metadata: Default::default(),
                },
            );
            self.bus.publish(BusMessage::Dispatch(DispatchRequest {
                submission_id: self.submission_id.to_string(),
                session_id: self.session_id.to_string(),
                call: call.clone(),
            }));
            dispatched.push(call);
        }

        // Phase 4: tool execution.
        let mut tool_responses = 0;
        if !dispatched.is_empty() {
            let ids: Vec<String> = dispatched.iter().map(|c| c.id.clone()).collect();
            let results = await_results(
                bus_rx,
                &ids,
                Some(self.config.tool_timeout),
                self.cancel,
            )
            .await?;
            for (call, result) in dispatched.iter().zip(results) {
                if result.is_failure() {
                    log_tool_failure(call, &result);
                } else if result.kind == UPDATE_PLAN_KIND {
                    let plan = result.plan.clone().unwrap_or(serde_json::Value::Null);
                    self.publish(EventMsg::PlanUpdated { plan }).await;
                }
                let response = ResponseInputItem::FunctionCallOutput {
                    call_id: call.id.clone(),
                    output: result_payload(&result),
                };
                items.push(ProcessedResponseItem {
                    item: response.clone().into(),
                    response: Some(response),
                });
                tool_responses += 1;
            }
        }

        let final_text = items
            .iter()
            .rev()
            .filter(|p| p.item.is_message_with_role("assistant"))
            .find_map(|p| p.item.message_text())
            .unwrap_or(full_text);

        Ok(TurnOutput { items, final_text, usage, tool_responses })
    }

    /// Drive one model call per attempt, each under a fresh request deadline.
    ///
    /// Transient network failures (matched by substring, case-insensitively)
    /// get at least [`MIN_NETWORK_RETRIES`] retries; everything else is
    /// retried `config.retries` times.
    async fn stream_with_retries(&mut self, prompt: &Prompt) -> Result<Collector, CoreError> {
        let mut retries_done: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CoreError::Interrupted(Some(crate::error::Stage::ModelInteraction)));
            }
            let err = match self.stream_once(prompt).await? {
                Ok(collector) => return Ok(collector),
                Err(err) => err,
            };
            let (transient, source) = match &err {
                AttemptError::Stream(e) => {
                    // Match against the whole error chain, case-insensitively.
                    let text = format!("{e:#}");
                    (text.to_lowercase().contains(NETWORK_FAILURE_MARKER), text)
                }
                AttemptError::Timeout => (false, "request timeout".to_string()),
            };
            let allowed = if transient {
                self.config.retries.max(MIN_NETWORK_RETRIES)
            } else {
                self.config.retries
            };
            if retries_done >= allowed {
                return Err(match err {
                    AttemptError::Timeout => CoreError::RequestTimeout,
                    AttemptError::Stream(e) => CoreError::ModelStream(e),
                });
            }
            retries_done += 1;
            warn!(
                attempt = retries_done,
                allowed,
                transient,
                error = %source,
                "model call failed; retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(CoreError::Interrupted(Some(crate::error::Stage::ModelInteraction)))
                }
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }

    /// One attempt: open the stream, feed the collector, publish deltas.
    ///
    /// The outer `Result` is cancellation; the inner one is the attempt
    /// outcome fed to the retry policy.
    async fn stream_once(
        &mut self,
        prompt: &Prompt,
    ) -> Result<Result<Collector, AttemptError>, CoreError> {
        let request_timeout = self.config.request_timeout;
        let cancel = self.cancel.clone();
        let drive = async {
            let mut stream = match self.client.stream(prompt).await {
                Ok(s) => s,
                Err(e) => return Err(AttemptError::Stream(e)),
            };
            let mut collector = Collector::new();
            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => return Err(AttemptError::Stream(e)),
                };
                for delta in collector.push(event) {
                    let sequence = *self.sequence;
                    *self.sequence += 1;
                    let _ = self
                        .eq_tx
                        .send(Event::new(
                            self.submission_id,
                            self.session_id,
                            EventMsg::AgentOutput { content: delta, sequence, is_final: false },
                        ))
                        .await;
                }
                if collector.is_completed() {
                    break;
                }
            }
            Ok(collector)
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Interrupted(Some(crate::error::Stage::ModelInteraction))),
            res = tokio::time::timeout(request_timeout, drive) => Ok(match res {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptError::Timeout),
            }),
        }
    }

    async fn publish(&self, msg: EventMsg) {
        let _ = self
            .eq_tx
            .send(Event::new(self.submission_id, self.session_id, msg))
            .await;
    }
}

/// Shape a tool result into the payload fed back to the model.
fn result_payload(result: &ToolResult) -> FunctionCallOutputPayload {
    let success = !result.is_failure();
    let output = result.output.clone().unwrap_or_default();
    let content = if result.kind == COMMAND_KIND {
        if let Some(session_id) = &result.session_id {
            serde_json::json!({ "output": output, "session_id": session_id }).to_string()
        } else {
            serde_json::json!({
                "output": output,
                "exit_code": result.exit_code.unwrap_or(0),
            })
            .to_string()
        }
    } else if success {
        output
    } else {
        result
            .error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or(output)
    };
    FunctionCallOutputPayload { content, content_items: None, success: Some(success) }
}

/// Log a failed tool result with enough context to diagnose it from the log
/// alone.  Patches get a head/tail preview instead of the full diff.
fn log_tool_failure(call: &ToolCall, result: &ToolResult) {
    let payload_preview = truncate(&call.payload.to_string(), TruncationPolicy::Bytes(256));
    if result.kind == "apply_patch" {
        let diff_preview = result
            .diff
            .as_deref()
            .map(|d| truncate(d, TruncationPolicy::Bytes(512)))
            .unwrap_or_default();
        warn!(
            kind = %result.kind,
            path = result.path.as_deref().unwrap_or(""),
            exit_code = ?result.exit_code,
            error = result.error.as_deref().unwrap_or(""),
            payload = %payload_preview,
            diff = %diff_preview,
            "tool reported failure"
        );
    } else {
        warn!(
            kind = %result.kind,
            command = result.command.as_deref().unwrap_or(""),
            path = result.path.as_deref().unwrap_or(""),
            exit_code = ?result.exit_code,
            error = result.error.as_deref().unwrap_or(""),
            payload = %payload_preview,
            "tool reported failure"
        );
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
