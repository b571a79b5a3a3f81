// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Task scheduler: submission queue in, event queue out.
//!
//! A pool of workers drains the submission queue.  Each `user_input` runs as
//! one task (a loop of turns over the session) with at most one active task
//! per session: a newer submission cancels the running one before starting.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use echo_config::Config;
use echo_model::{window, ModelClient, TokenUsage, ToolSchema};
use echo_tools::{ApprovalDecision, BusMessage, ToolBus};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::compact::run_inline_compaction;
use crate::dispatch::{spawn_forwarder, CallContextRegistry};
use crate::error::{CoreError, Stage};
use crate::events::{Event, EventMsg, TaskStatus, TaskSummary};
use crate::items::{ContentItem, ResponseItem};
use crate::prompt::build_prompt;
use crate::session::{InputContext, SessionManager};
use crate::truncate::approx_tokens_for_prompt;
use crate::turn::TurnRunner;

const SUBMISSION_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 256;

/// One submission-queue entry.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: String,
    pub op: Op,
}

/// Operations accepted on the submission queue.
#[derive(Debug, Clone)]
pub enum Op {
    UserInput {
        session_id: String,
        items: Vec<InputItem>,
        context: InputContext,
    },
    Interrupt {
        session_id: String,
    },
    ApprovalDecision {
        approval_id: String,
        approved: bool,
    },
}

#[derive(Debug, Clone)]
pub enum InputItem {
    Text { text: String },
    Image { image_url: String },
}

struct ActiveTask {
    submission_id: String,
    handle: CancelHandle,
}

struct Inner {
    config: Config,
    client: Arc<dyn ModelClient>,
    bus: ToolBus,
    tools: Vec<ToolSchema>,
    sessions: SessionManager,
    registry: Arc<CallContextRegistry>,
    active: StdMutex<HashMap<String, ActiveTask>>,
    eq_tx: mpsc::Sender<Event>,
}

/// Handle for submitting work.  Dropping every clone closes the submission
/// queue; workers finish their current tasks and exit.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    sq_tx: mpsc::Sender<Submission>,
}

impl Scheduler {
    /// Start workers and the bus forwarder.  Returns the scheduler and the
    /// event-queue receiver.
    pub fn spawn(
        config: Config,
        client: Option<Arc<dyn ModelClient>>,
        bus: ToolBus,
        tools: Vec<ToolSchema>,
    ) -> Result<(Self, mpsc::Receiver<Event>), CoreError> {
        let client = client
            .ok_or_else(|| CoreError::Submission("a model client is required".to_string()))?;
        let (sq_tx, sq_rx) = mpsc::channel::<Submission>(SUBMISSION_QUEUE_CAPACITY);
        let (eq_tx, eq_rx) = mpsc::channel::<Event>(EVENT_QUEUE_CAPACITY);

        let inner = Arc::new(Inner {
            sessions: SessionManager::new(config.defaults.clone()),
            registry: Arc::new(CallContextRegistry::new()),
            active: StdMutex::new(HashMap::new()),
            config,
            client,
            bus,
            tools,
            eq_tx,
        });

        let _forwarder = spawn_forwarder(&inner.bus, Arc::clone(&inner.registry), inner.eq_tx.clone());

        let sq_rx = Arc::new(Mutex::new(sq_rx));
        for worker in 0..inner.config.workers.max(1) {
            let inner = Arc::clone(&inner);
            let sq_rx = Arc::clone(&sq_rx);
            tokio::spawn(async move {
                debug!(worker, "submission worker started");
                loop {
                    let submission = { sq_rx.lock().await.recv().await };
                    match submission {
                        Some(sub) => inner.handle(sub).await,
                        None => break,
                    }
                }
                debug!(worker, "submission worker stopped");
            });
        }

        Ok((Self { inner, sq_tx }, eq_rx))
    }

    /// Validate and enqueue an operation.  Returns the submission id.
    pub async fn submit(&self, op: Op) -> Result<String, CoreError> {
        let session_id = match &op {
            Op::UserInput { session_id, items, .. } => {
                if session_id.is_empty() {
                    return Err(CoreError::Submission("session id is empty".into()));
                }
                if items.is_empty() {
                    return Err(CoreError::Submission("user input items are empty".into()));
                }
                let has_input = items.iter().any(|i| match i {
                    InputItem::Text { text } => !text.is_empty(),
                    InputItem::Image { .. } => true,
                });
                if !has_input {
                    return Err(CoreError::Submission("user input is missing".into()));
                }
                session_id.clone()
            }
            Op::Interrupt { session_id } => session_id.clone(),
            Op::ApprovalDecision { .. } => String::new(),
        };

        let id = Uuid::new_v4().to_string();
        let _ = self
            .inner
            .eq_tx
            .send(Event::new(id.clone(), session_id, EventMsg::SubmissionAccepted))
            .await;
        self.sq_tx
            .send(Submission { id: id.clone(), op })
            .await
            .map_err(|_| CoreError::Submission("scheduler is shut down".into()))?;
        Ok(id)
    }

    /// Deep copy of a session's history.  Embedders use this for persistence,
    /// which the core itself does not own.
    pub fn history_snapshot(&self, session_id: &str) -> Vec<ResponseItem> {
        self.inner.sessions.snapshot(session_id)
    }
}

/// Everything a finished task reports to the finalizer.
struct TaskExit {
    status: TaskStatus,
    exit_reason: &'static str,
    stage: Stage,
    error: Option<CoreError>,
}

impl Inner {
    async fn handle(&self, sub: Submission) {
        match sub.op {
            Op::Interrupt { session_id } => {
                let task = self.active.lock().unwrap().remove(&session_id);
                if let Some(task) = task {
                    debug!(%session_id, submission_id = %task.submission_id, "interrupting task");
                    task.handle.cancel();
                }
            }
            Op::ApprovalDecision { approval_id, approved } => {
                self.bus
                    .publish(BusMessage::Approval(ApprovalDecision { approval_id, approved }));
            }
            Op::UserInput { session_id, items, context } => {
                self.run_task(sub.id, session_id, items, context).await;
            }
        }
    }

    async fn run_task(
        &self,
        submission_id: String,
        session_id: String,
        items: Vec<InputItem>,
        input_ctx: InputContext,
    ) {
        // Per-session exclusivity: cancel-and-replace.
        let (handle, cancel) = cancel_pair();
        {
            let mut active = self.active.lock().unwrap();
            let previous = active.insert(
                session_id.clone(),
                ActiveTask { submission_id: submission_id.clone(), handle },
            );
            if let Some(previous) = previous {
                debug!(%session_id, "replacing active task");
                previous.handle.cancel();
            }
        }

        // Preflight.
        let started = Instant::now();
        let mut sequence: u64 = 0;
        let mut published: HashSet<(String, String)> = HashSet::new();
        let mut usage_total = TokenUsage::default();
        let mut bus_rx = self.bus.subscribe();

        self.sessions.append(&session_id, input_items(items));
        let model = self
            .sessions
            .with_session(&session_id, |s| s.turn_context(&input_ctx).model);

        let exit = self
            .turn_loop(
                &submission_id,
                &session_id,
                &input_ctx,
                &cancel,
                &mut bus_rx,
                &mut sequence,
                &mut published,
                &mut usage_total,
            )
            .await;

        // Finalization: unsubscribe, clear the active slot, summary last.
        drop(bus_rx);
        {
            let mut active = self.active.lock().unwrap();
            if active
                .get(&session_id)
                .is_some_and(|t| t.submission_id == submission_id)
            {
                active.remove(&session_id);
            }
        }
        let summary = make_summary(&exit, &model, started, &usage_total);
        let _ = self
            .eq_tx
            .send(Event::new(&submission_id, &session_id, EventMsg::TaskSummary(summary)))
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn turn_loop(
        &self,
        submission_id: &str,
        session_id: &str,
        input_ctx: &InputContext,
        cancel: &CancelToken,
        bus_rx: &mut tokio::sync::broadcast::Receiver<BusMessage>,
        sequence: &mut u64,
        published: &mut HashSet<(String, String)>,
        usage_total: &mut TokenUsage,
    ) -> TaskExit {
        let mut turn_index: u32 = 0;
        loop {
            // ctx_check
            if cancel.is_cancelled() {
                return TaskExit {
                    status: TaskStatus::Interrupted,
                    exit_reason: "context_done",
                    stage: Stage::CtxCheck,
                    error: None,
                };
            }

            // run_turn
            let ctx = self
                .sessions
                .with_session(session_id, |s| s.turn_context(input_ctx));
            let turn = {
                let mut runner = TurnRunner {
                    config: &self.config,
                    client: &self.client,
                    bus: &self.bus,
                    registry: &self.registry,
                    eq_tx: &self.eq_tx,
                    cancel,
                    submission_id,
                    session_id,
                    sequence: &mut *sequence,
                    published: &mut *published,
                    tools: &self.tools,
                };
                runner.run(&ctx, bus_rx).await
            };
            let output = match turn {
                Ok(output) => output,
                Err(err) => return classify_turn_error(err),
            };
            usage_total.add(&output.usage);
            debug!(turn = turn_index, responses = output.tool_responses, "turn finished");

            // process_output
            let to_record: Vec<ResponseItem> =
                output.items.iter().map(|p| p.item.clone()).collect();
            self.sessions.append(session_id, to_record);

            // token_limit
            if let Some(context_window) = window::effective_context_window(&ctx.model) {
                let next_ctx = self
                    .sessions
                    .with_session(session_id, |s| s.turn_context(input_ctx));
                let estimate =
                    approx_tokens_for_prompt(&build_prompt(&next_ctx, self.tools.clone()));
                if estimate >= window::auto_compact_limit(context_window) {
                    let snapshot = self.sessions.snapshot(session_id);
                    match run_inline_compaction(&self.client, &next_ctx, snapshot, context_window)
                        .await
                    {
                        Ok(items) => {
                            self.sessions.replace(session_id, items);
                            turn_index += 1;
                            continue;
                        }
                        Err(err @ CoreError::ContextWindowTooSmallForCompaction) => {
                            return TaskExit {
                                status: TaskStatus::Failed,
                                exit_reason: "error",
                                stage: Stage::RunTask,
                                error: Some(err),
                            };
                        }
                        Err(err) => {
                            warn!(error = %err, "compaction failed; continuing uncompacted");
                        }
                    }
                }
            }

            // check_completion
            if output.tool_responses == 0 {
                let final_sequence = *sequence;
                *sequence += 1;
                let _ = self
                    .eq_tx
                    .send(Event::new(
                        submission_id,
                        session_id,
                        EventMsg::AgentOutput {
                            content: output.final_text,
                            sequence: final_sequence,
                            is_final: true,
                        },
                    ))
                    .await;
                return TaskExit {
                    status: TaskStatus::Completed,
                    exit_reason: "completed_final",
                    stage: Stage::FinalNoResponses,
                    error: None,
                };
            }
            turn_index += 1;
        }
    }
}

fn classify_turn_error(err: CoreError) -> TaskExit {
    let stage = err.stage().unwrap_or(Stage::RunTask);
    let (status, exit_reason) = if err.is_cancellation() {
        (TaskStatus::Interrupted, "context_done")
    } else if err.is_deadline() {
        (TaskStatus::Timeout, "context_done")
    } else {
        (TaskStatus::Failed, "error")
    };
    TaskExit { status, exit_reason, stage, error: Some(err) }
}

fn input_items(items: Vec<InputItem>) -> Vec<ResponseItem> {
    items
        .into_iter()
        .map(|item| match item {
            InputItem::Text { text } => ResponseItem::user_message(text),
            InputItem::Image { image_url } => ResponseItem::Message {
                role: "user".to_string(),
                content: vec![ContentItem::InputImage { image_url }],
            },
        })
        .collect()
}

fn make_summary(
    exit: &TaskExit,
    model: &str,
    started: Instant,
    usage: &TokenUsage,
) -> TaskSummary {
    let status_name = match exit.status {
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Interrupted => "interrupted",
        TaskStatus::Timeout => "timeout",
    };
    let analysis = match exit.status {
        TaskStatus::Completed => "task completed".to_string(),
        TaskStatus::Interrupted => "task was interrupted before completion".to_string(),
        TaskStatus::Timeout => format!("a deadline expired during {}", exit.stage),
        TaskStatus::Failed => format!("task failed during {}", exit.stage),
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    let text = format!(
        "status: {status_name}\nmodel: {model}\nduration: {duration_ms}ms\nexit: {} ({})\n{analysis}",
        exit.exit_reason, exit.stage,
    );
    TaskSummary {
        status: exit.status,
        text,
        error: exit.error.as_ref().map(|e| e.to_string()),
        exit_reason: exit.exit_reason.to_string(),
        exit_stage: exit.stage.as_str().to_string(),
        duration_ms,
        model: model.to_string(),
        input_tokens: usage.input_tokens,
        cached_input_tokens: usage.cached_input_tokens,
        output_tokens: usage.output_tokens,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
