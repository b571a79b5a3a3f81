// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Tool dispatch bookkeeping and result correlation.
//!
//! The scheduler records a context per dispatched call id so bus events can
//! be routed back to the right submission; the turn runner waits on its own
//! bus subscription for the completions of exactly the calls it dispatched.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use echo_tools::{BusMessage, ToolBus, ToolResult};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::CoreError;
use crate::events::{Event, EventMsg};

/// Routing metadata remembered per dispatched call id.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub submission_id: String,
    pub session_id: String,
    pub metadata: HashMap<String, String>,
}

/// call_id → submission routing.  Insert on dispatch, clear on the forwarded
/// `item.completed`.
#[derive(Default)]
pub struct CallContextRegistry {
    inner: Mutex<HashMap<String, CallContext>>,
}

impl CallContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call_id: impl Into<String>, ctx: CallContext) {
        self.inner.lock().unwrap().insert(call_id.into(), ctx);
    }

    pub fn get(&self, call_id: &str) -> Option<CallContext> {
        self.inner.lock().unwrap().get(call_id).cloned()
    }

    pub fn remove(&self, call_id: &str) -> Option<CallContext> {
        self.inner.lock().unwrap().remove(call_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Republish every routable bus ToolEvent onto the event queue, enriched with
/// the registered submission context.  Events whose call id is unknown have
/// no routing and are dropped.  Runs until the event queue closes.
pub fn spawn_forwarder(
    bus: &ToolBus,
    registry: std::sync::Arc<CallContextRegistry>,
    eq_tx: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BusMessage::Tool(ev)) => {
                    let ctx = if ev.is_completed() {
                        registry.remove(&ev.result.id)
                    } else {
                        registry.get(&ev.result.id)
                    };
                    let Some(ctx) = ctx else {
                        debug!(call_id = %ev.result.id, "tool event without routing context");
                        continue;
                    };
                    let mut event = Event::new(
                        ctx.submission_id,
                        ctx.session_id,
                        EventMsg::ToolEvent { event_type: ev.event_type, result: ev.result },
                    );
                    event.metadata = ctx.metadata;
                    if eq_tx.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "forwarder lagged behind the tool bus");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Wait for one `item.completed` per dispatched call and return the results
/// in dispatch order, regardless of completion order.
///
/// Events for unknown call ids are ignored.  `deadline` should be `None`
/// when an outer scope already bounds the wait; otherwise it is applied here
/// as the single source of truth.
pub async fn await_results(
    rx: &mut broadcast::Receiver<BusMessage>,
    ordered_ids: &[String],
    deadline: Option<Duration>,
    cancel: &CancelToken,
) -> Result<Vec<ToolResult>, CoreError> {
    let wait = collect_completions(rx, ordered_ids, cancel);
    let mut by_id = match deadline {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| CoreError::ToolTimeout)??,
        None => wait.await?,
    };
    Ok(ordered_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect())
}

async fn collect_completions(
    rx: &mut broadcast::Receiver<BusMessage>,
    ordered_ids: &[String],
    cancel: &CancelToken,
) -> Result<HashMap<String, ToolResult>, CoreError> {
    let mut results: HashMap<String, ToolResult> = HashMap::new();
    while results.len() < ordered_ids.len() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CoreError::Interrupted(Some(crate::error::Stage::ToolExecution)))
            }
            msg = rx.recv() => match msg {
                Ok(BusMessage::Tool(ev)) if ev.is_completed() => {
                    let id = ev.result.id.clone();
                    if ordered_ids.contains(&id) && !results.contains_key(&id) {
                        results.insert(id, ev.result);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "turn correlation lagged behind the tool bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CoreError::ToolWait(anyhow::anyhow!(
                        "tool bus closed while awaiting completions"
                    )));
                }
            },
        }
    }
    Ok(results)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use echo_tools::{ToolEvent, ToolStatus};
    use std::sync::Arc;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn results_follow_dispatch_order_not_completion_order() {
        let bus = ToolBus::default();
        let mut rx = bus.subscribe();
        bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok("b", "shell", "2"))));
        bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok("a", "shell", "1"))));
        let results = await_results(
            &mut rx,
            &ids(&["a", "b"]),
            Some(Duration::from_secs(1)),
            &CancelToken::noop(),
        )
        .await
        .unwrap();
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }

    #[tokio::test]
    async fn unknown_ids_and_non_terminal_events_are_ignored() {
        let bus = ToolBus::default();
        let mut rx = bus.subscribe();
        bus.publish(BusMessage::Tool(ToolEvent::started(ToolResult::ok("a", "shell", ""))));
        bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok("zz", "shell", ""))));
        bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok("a", "shell", "done"))));
        let results = await_results(
            &mut rx,
            &ids(&["a"]),
            Some(Duration::from_secs(1)),
            &CancelToken::noop(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output.as_deref(), Some("done"));
        assert_eq!(results[0].status, ToolStatus::Ok);
    }

    #[tokio::test]
    async fn missing_completion_times_out() {
        let bus = ToolBus::default();
        let mut rx = bus.subscribe();
        let err = await_results(
            &mut rx,
            &ids(&["never"]),
            Some(Duration::from_millis(30)),
            &CancelToken::noop(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::ToolTimeout));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let bus = ToolBus::default();
        let mut rx = bus.subscribe();
        let (handle, token) = cancel_pair();
        handle.cancel();
        let err = await_results(&mut rx, &ids(&["x"]), None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Interrupted(_)));
    }

    #[tokio::test]
    async fn forwarder_enriches_and_clears_registry_on_completion() {
        let bus = ToolBus::default();
        let registry = Arc::new(CallContextRegistry::new());
        registry.insert(
            "t1",
            CallContext {
                submission_id: "sub1".into(),
                session_id: "sess1".into(),
                metadata: HashMap::from([("k".to_string(), "v".to_string())]),
            },
        );
        let (eq_tx, mut eq_rx) = mpsc::channel(8);
        let _task = spawn_forwarder(&bus, Arc::clone(&registry), eq_tx);

        bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok("t1", "shell", "hi"))));
        let event = tokio::time::timeout(Duration::from_secs(1), eq_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.submission_id, "sub1");
        assert_eq!(event.session_id, "sess1");
        assert_eq!(event.metadata.get("k").map(String::as_str), Some("v"));
        assert!(matches!(event.msg, EventMsg::ToolEvent { .. }));
        assert!(registry.is_empty(), "completion must clear the registry entry");
    }

    #[tokio::test]
    async fn forwarder_drops_unroutable_events() {
        let bus = ToolBus::default();
        let registry = Arc::new(CallContextRegistry::new());
        let (eq_tx, mut eq_rx) = mpsc::channel(8);
        let _task = spawn_forwarder(&bus, registry, eq_tx);
        bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok("??", "shell", ""))));
        let got = tokio::time::timeout(Duration::from_millis(50), eq_rx.recv()).await;
        assert!(got.is_err(), "unroutable event must not reach the queue");
    }
}
