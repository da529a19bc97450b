// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{CompletionRequest, CompletionResponse, ModelProvider, Role};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(CompletionResponse::text(format!("MOCK: {reply}")))
    }
}

/// A pre-scripted mock provider.  Each `complete` call pops the next
/// response from the front of the queue, so tests can specify exact turn
/// sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Mutex<VecDeque<CompletionResponse>>,
    model_name: String,
    context_window: usize,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `complete()` call so tests can inspect what was sent.
    pub last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<CompletionResponse>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            model_name: "scripted-mock".into(),
            context_window: 128_000,
            last_request: Mutex::new(None),
        }
    }

    /// Override the reported model name (exercises family-specific judge
    /// parsing).
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Override the reported context window (exercises compaction).
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    /// Number of unconsumed scripted responses.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        *self.last_request.lock().unwrap() = Some(req);
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted mock exhausted: no response queued"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Message;

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let req = CompletionRequest {
            messages: vec![Message::user("first"), Message::user("second")],
            ..Default::default()
        };
        let resp = p.complete(req).await.unwrap();
        assert_eq!(resp.content, "MOCK: second");
    }

    #[tokio::test]
    async fn scripted_pops_in_order() {
        let p = ScriptedMockProvider::new(vec![
            CompletionResponse::text("one"),
            CompletionResponse::text("two"),
        ]);
        assert_eq!(p.complete(CompletionRequest::default()).await.unwrap().content, "one");
        assert_eq!(p.complete(CompletionRequest::default()).await.unwrap().content, "two");
        assert!(p.complete(CompletionRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedMockProvider::new(vec![CompletionResponse::text("ok")]);
        let req = CompletionRequest {
            system: Some("sys".into()),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        p.complete(req).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().system.as_deref(), Some("sys"));
    }

    #[tokio::test]
    async fn scripted_tool_call_response() {
        let p = ScriptedMockProvider::new(vec![CompletionResponse::with_tool_call(
            "",
            "c1",
            "shell",
            json!({"command": "ls"}),
        )]);
        let resp = p.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "shell");
    }
}
