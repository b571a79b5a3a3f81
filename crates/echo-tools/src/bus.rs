// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::broadcast;
use tracing::debug;

use crate::{ApprovalDecision, DispatchRequest, ToolEvent};

/// Smallest per-subscriber buffer the turn runner tolerates.
///
/// The runner treats dropped bus events as a correctness failure, so the
/// buffer must cover the expected tool fan-in of a turn.
pub const MIN_BUS_CAPACITY: usize = 64;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Everything that travels on the tool bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// Core → runners: execute this call.
    Dispatch(DispatchRequest),
    /// Runners → core: progress / completion for a call.
    Tool(ToolEvent),
    /// Core → runners: decision for a gated execution.
    Approval(ApprovalDecision),
}

/// Multi-producer / multi-consumer broadcast channel connecting the core to
/// external tool runners.  Every subscriber gets an independent bounded
/// buffer; late subscribers miss earlier traffic.
#[derive(Debug, Clone)]
pub struct ToolBus {
    tx: broadcast::Sender<BusMessage>,
}

impl ToolBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(MIN_BUS_CAPACITY));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers.  Returns the receiver count; zero
    /// means the message went nowhere, which callers may treat as "no runner
    /// attached".
    pub fn publish(&self, msg: BusMessage) -> usize {
        match self.tx.send(msg) {
            Ok(n) => n,
            Err(_) => {
                debug!("tool bus publish with no subscribers");
                0
            }
        }
    }
}

impl Default for ToolBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolCall, ToolResult};
    use serde_json::json;

    #[tokio::test]
    async fn every_subscriber_sees_every_message() {
        let bus = ToolBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let req = DispatchRequest {
            submission_id: "sub1".into(),
            session_id: "sess1".into(),
            call: ToolCall::new("t1", "shell", json!({"cmd": "ls"})),
        };
        assert_eq!(bus.publish(BusMessage::Dispatch(req)), 2);
        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                BusMessage::Dispatch(d) => assert_eq!(d.call.id, "t1"),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = ToolBus::default();
        let n = bus.publish(BusMessage::Tool(ToolEvent::completed(ToolResult::ok(
            "t1", "shell", "",
        ))));
        assert_eq!(n, 0);
    }

    #[test]
    fn capacity_floor_is_enforced() {
        // Indirect check: constructing with a tiny capacity must not panic and
        // must still buffer MIN_BUS_CAPACITY messages for a lagging receiver.
        let bus = ToolBus::new(1);
        let mut rx = bus.subscribe();
        for i in 0..MIN_BUS_CAPACITY {
            bus.publish(BusMessage::Approval(ApprovalDecision {
                approval_id: format!("a{i}"),
                approved: true,
            }));
        }
        for _ in 0..MIN_BUS_CAPACITY {
            assert!(rx.try_recv().is_ok());
        }
    }
}
