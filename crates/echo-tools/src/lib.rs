// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod bus;
pub mod events;
mod tool;

pub use bus::{BusMessage, ToolBus, MIN_BUS_CAPACITY};
pub use events::{ApprovalDecision, DispatchRequest, ToolEvent, ITEM_COMPLETED, ITEM_STARTED};
pub use tool::{ToolCall, ToolResult, ToolStatus};
