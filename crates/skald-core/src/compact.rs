// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Context-window compaction.
//!
//! Before each iteration the orchestrator estimates the full prompt cost
//! (system prompt + message log + tool schemas) against the model's
//! context window.  Over the threshold, the middle of the log is replaced
//! by one synthetic system summary message; the first user message (the
//! task anchor) and the most recent messages survive verbatim.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use skald_model::{CompletionRequest, Message, ModelProvider, Role, ToolSchema};

/// Ceiling for the summarization model call.
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-message cap when serializing history into the summary prompt.
const SERIALIZE_MESSAGE_CAP: usize = 2_000;

const SUMMARY_PROMPT: &str = "You are a context compaction assistant for a coding agent. \
     Summarise the following conversation span in a concise, information-dense way. \
     Preserve file paths, decisions, error messages, and unfinished work verbatim \
     where they matter; the summary replaces the original messages.";

const SUMMARY_HEADER: &str = "Conversation summary up to this point:";

/// Estimate the prompt cost of one request in approximate tokens.
pub fn estimate_prompt_tokens(
    system: &str,
    messages: &[Message],
    schemas: &[ToolSchema],
) -> usize {
    system.len() / 4
        + messages.iter().map(Message::approx_tokens).sum::<usize>()
        + schemas.iter().map(ToolSchema::approx_tokens).sum::<usize>()
}

pub fn needs_compaction(estimated: usize, context_window: usize, threshold: f32) -> bool {
    if context_window == 0 {
        return false;
    }
    (estimated as f32) / (context_window as f32) >= threshold
}

/// Produce the compacted message list.
///
/// Kept verbatim: the first user message and the last `keep_recent`
/// messages (extended backward past tool results so a tool-interaction
/// group is never split from its assistant call).  Everything between is
/// summarized with the judge model, or — when no judge is available or it
/// fails — replaced by a deterministic dropped-history notice.
pub async fn compact_messages(
    judge: Option<&Arc<dyn ModelProvider>>,
    messages: &[Message],
    keep_recent: usize,
) -> Vec<Message> {
    let anchor_idx = messages.iter().position(|m| m.role == Role::User);
    let mut tail_start = messages.len().saturating_sub(keep_recent);
    // Never summarize the anchor into the middle.
    if let Some(anchor) = anchor_idx {
        tail_start = tail_start.max(anchor + 1);
    }
    // Do not start the tail on a tool result whose call was summarized away.
    while tail_start > 0
        && tail_start < messages.len()
        && messages[tail_start].role == Role::Tool
    {
        tail_start -= 1;
    }

    let middle_range = anchor_idx.map(|a| a + 1).unwrap_or(0)..tail_start;
    if middle_range.is_empty() {
        return messages.to_vec();
    }
    let middle = &messages[middle_range.clone()];

    let summary_text = match judge {
        Some(judge) => match summarize(judge.as_ref(), middle).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                warn!("compaction summary came back empty; dropping span");
                dropped_notice(middle.len())
            }
            Err(e) => {
                warn!("compaction summary failed ({e}); dropping span");
                dropped_notice(middle.len())
            }
        },
        None => dropped_notice(middle.len()),
    };

    let mut out = Vec::with_capacity(messages.len() - middle.len() + 1);
    if let Some(anchor) = anchor_idx {
        out.extend(messages[..=anchor].iter().cloned());
    }
    out.push(Message::system(format!("{SUMMARY_HEADER}\n{summary_text}")));
    out.extend(messages[tail_start..].iter().cloned());
    debug!(
        before = messages.len(),
        after = out.len(),
        "conversation compacted"
    );
    out
}

fn dropped_notice(count: usize) -> String {
    format!(
        "[{count} earlier messages were dropped to fit the context window. \
         Earlier details may be missing; ask the user to restate anything essential.]"
    )
}

async fn summarize(judge: &dyn ModelProvider, middle: &[Message]) -> anyhow::Result<String> {
    let request = CompletionRequest {
        system: Some(SUMMARY_PROMPT.to_string()),
        messages: vec![Message::user(serialize_history(middle))],
        tools: vec![],
    };
    let response = tokio::time::timeout(SUMMARY_TIMEOUT, judge.complete(request))
        .await
        .map_err(|_| anyhow::anyhow!("summarization timed out"))??;
    Ok(response.content.trim().to_string())
}

fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system".to_string(),
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
                Role::Tool => format!("tool({})", m.tool_name.as_deref().unwrap_or("?")),
            };
            let mut content = m.content.clone();
            if content.len() > SERIALIZE_MESSAGE_CAP {
                let mut cut = SERIALIZE_MESSAGE_CAP;
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                content.truncate(cut);
                content.push_str(" […]");
            }
            if let Some(calls) = &m.tool_calls {
                let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                content.push_str(&format!(" [tool calls: {}]", names.join(", ")));
            }
            format!("{role}: {content}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use skald_model::{CompletionResponse, ScriptedMockProvider};

    use super::*;

    fn conversation(n: usize) -> Vec<Message> {
        let mut msgs = vec![Message::user("the task")];
        for i in 0..n {
            msgs.push(Message::assistant(format!("working on part {i}")));
        }
        msgs
    }

    #[test]
    fn estimate_counts_all_three_parts() {
        let system = "x".repeat(400); // 100 tokens
        let messages = vec![Message::user("y".repeat(40))]; // 10 tokens
        let schemas = vec![ToolSchema {
            name: "t".into(),
            description: "d".into(),
            parameters: serde_json::json!({}),
        }];
        let est = estimate_prompt_tokens(&system, &messages, &schemas);
        assert!(est >= 110);
    }

    #[test]
    fn threshold_boundary() {
        assert!(needs_compaction(90, 100, 0.9));
        assert!(!needs_compaction(89, 100, 0.9));
        assert!(!needs_compaction(1000, 0, 0.9));
    }

    #[tokio::test]
    async fn compaction_keeps_anchor_summary_and_tail() {
        let judge: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::new(vec![
            CompletionResponse::text("SUMMARY OF THE MIDDLE"),
        ]));
        let messages = conversation(20);
        let out = compact_messages(Some(&judge), &messages, 4).await;

        // anchor + summary + 4 recent
        assert_eq!(out.len(), 6);
        assert_eq!(out[0].content, "the task");
        assert_eq!(out[1].role, Role::System);
        assert!(out[1].content.contains("SUMMARY OF THE MIDDLE"));
        assert_eq!(out[5].content, "working on part 19");
    }

    #[tokio::test]
    async fn no_judge_uses_dropped_notice() {
        let messages = conversation(20);
        let out = compact_messages(None, &messages, 4).await;
        assert!(out[1].content.contains("dropped"));
    }

    #[tokio::test]
    async fn short_conversation_is_untouched() {
        let messages = conversation(2);
        let out = compact_messages(None, &messages, 8).await;
        assert_eq!(out, messages);
    }

    #[tokio::test]
    async fn tail_never_starts_on_a_tool_result() {
        let mut messages = vec![Message::user("task")];
        for i in 0..10 {
            messages.push(Message::assistant(format!("thinking {i}")));
        }
        messages.push(Message::assistant_with_tool_calls(
            "",
            vec![skald_model::ToolCallDescriptor {
                id: "c1".into(),
                name: "shell".into(),
                arguments: serde_json::json!({}),
            }],
        ));
        messages.push(Message::tool_result("c1", "shell", "out"));
        messages.push(Message::assistant("done"));

        // keep_recent = 2 would start the tail on the tool result; the
        // boundary must retreat to include the assistant call.
        let out = compact_messages(None, &messages, 2).await;
        let tool_pos = out
            .iter()
            .position(|m| m.role == Role::Tool)
            .expect("tool result kept");
        assert!(out[tool_pos - 1].has_tool_calls());
    }

    #[tokio::test]
    async fn judge_failure_falls_back_to_notice() {
        let judge: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::new(vec![]));
        let out = compact_messages(Some(&judge), &conversation(20), 4).await;
        assert!(out[1].content.contains("dropped"));
    }
}
