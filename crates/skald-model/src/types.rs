// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool invocation requested by an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDescriptor {
    /// Opaque identifier minted by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

/// A single message in the conversation history.
///
/// `tool_calls` is only populated on assistant messages; `tool_id` /
/// `tool_name` only on tool-result messages, binding the result back to the
/// assistant call that requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// An assistant message carrying tool calls (content may be empty).
    pub fn assistant_with_tool_calls(
        text: impl Into<String>,
        calls: Vec<ToolCallDescriptor>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            reasoning: None,
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            tool_id: None,
            tool_name: None,
        }
    }

    /// A tool-result message answering the call identified by `tool_id`.
    pub fn tool_result(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_id: Some(tool_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            reasoning: None,
            tool_calls: None,
            tool_id: None,
            tool_name: None,
        }
    }

    /// True for an assistant message that still expects tool results.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant
            && self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Approximate token count used for context management.
    ///
    /// Uses the 4-chars-per-token heuristic; tool-call arguments count like
    /// text.  Always at least 1 so empty messages still carry overhead.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(r) = &self.reasoning {
            chars += r.len();
        }
        if let Some(calls) = &self.tool_calls {
            for c in calls {
                chars += c.name.len() + c.arguments.to_string().len();
            }
        }
        (chars / 4).max(1)
    }
}

// ─── Request / response ───────────────────────────────────────────────────────

/// A tool schema as exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters object.
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Rough token cost of sending this schema with a request.
    pub fn approx_tokens(&self) -> usize {
        (self.name.len() + self.description.len() + self.parameters.to_string().len()) / 4
    }
}

/// One completion request as handed to a wire adapter.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt sent separately from the message log.
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// One full assistant turn returned by a wire adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDescriptor>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_call(
        content: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
            tool_calls: vec![ToolCallDescriptor {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
