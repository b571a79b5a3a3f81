// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod window;
mod adapter;
mod client;
mod mock;
mod types;

pub use adapter::StreamAdapter;
pub use client::{EventStream, ModelClient};
pub use mock::{MockClient, ScriptedMockClient};
pub use types::*;
