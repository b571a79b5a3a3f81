// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::watch;

/// Create a linked cancel handle/token pair for one task.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Owner side.  Dropping the handle without calling [`CancelHandle::cancel`]
/// also cancels the token; a task whose owner vanished must not keep running.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side, cloned into every suspension point of a task.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the task is cancelled (or the handle was dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// A token that never fires; for callers outside any task.
    pub fn noop() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open forever.
        std::mem::forget(tx);
        Self { rx }
    }
}
