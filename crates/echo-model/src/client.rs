// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{Prompt, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Contract every model transport must satisfy.
///
/// The core never assumes a vendor wire format; concrete clients translate
/// their protocol into [`StreamEvent`]s (see [`crate::StreamAdapter`] for the
/// block-based profile).  Streams must stop promptly when the consuming task
/// is dropped.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One-shot, non-streaming completion.  Used for compaction summaries.
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String>;

    /// Streaming completion.
    async fn stream(&self, prompt: &Prompt) -> anyhow::Result<EventStream>;
}
