// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crate::outcome::TerminationReason;

/// One-way status stream from the orchestrator to the frontend.
/// Events for one request are delivered in emission order.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A complete assistant message was appended to the session.
    AssistantMessage {
        content: String,
        reasoning: Option<String>,
    },
    /// The model requested a tool call; execution is starting.
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    /// A tool call finished.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// The loop re-entered with a synthetic "continue" prompt.
    AutoContinue { count: u32 },
    /// The conversation was compacted to fit the context window.
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        iteration: u32,
    },
    /// The planning sub-agent produced a plan.
    PlanReady { plan: String },
    /// The turn ended.
    Terminated { reason: TerminationReason },
    /// A recoverable error was reported to the user.
    Error(String),
}
