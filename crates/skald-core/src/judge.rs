// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use skald_model::{
    parse_judge_verdict, CompletionRequest, JudgeVerdict, Message, ModelProvider, Role,
};

/// Ceiling for one auto-continue judge call.
const JUDGE_TIMEOUT: Duration = Duration::from_secs(15);

/// How much trailing conversation the judge sees, in approximate tokens.
const JUDGE_TAIL_TOKENS: usize = 1000;

const AUTO_CONTINUE_PROMPT: &str = "You judge whether a coding agent has finished its \
     current task. You are given the agent's system prompt and the tail of the \
     conversation. If the agent's last message shows the task is complete or it is \
     waiting for the user, answer STOP. If the agent clearly intended to keep \
     working, answer CONTINUE. Answer with exactly one word: CONTINUE or STOP.";

/// Decide whether the loop should re-enter after a tool-free assistant turn.
///
/// Two deterministic shortcuts bypass the model entirely:
/// - the last assistant content, trailing newlines trimmed, ends with `:`
///   (the model was mid-enumeration) → CONTINUE;
/// - the repetition detector fired → STOP.
///
/// Without a judge model the answer is STOP: the loop never spins on its
/// own authority.
pub async fn auto_continue_verdict(
    judge: Option<&Arc<dyn ModelProvider>>,
    system_prompt: &str,
    messages: &[Message],
    last_text: &str,
    loop_detected: bool,
) -> JudgeVerdict {
    if loop_detected {
        return JudgeVerdict::Stop;
    }
    if last_text.trim_end_matches('\n').ends_with(':') {
        debug!("auto-continue shortcut: trailing colon");
        return JudgeVerdict::Continue;
    }
    let Some(judge) = judge else {
        return JudgeVerdict::Stop;
    };

    let tail = conversation_tail(messages, JUDGE_TAIL_TOKENS);
    let request = CompletionRequest {
        system: Some(AUTO_CONTINUE_PROMPT.to_string()),
        messages: vec![Message::user(format!(
            "Agent system prompt:\n{system_prompt}\n\nConversation tail:\n{tail}"
        ))],
        tools: vec![],
    };

    match tokio::time::timeout(JUDGE_TIMEOUT, judge.complete(request)).await {
        Ok(Ok(response)) => {
            let verdict = parse_judge_verdict(judge.model_name(), &response.content);
            debug!(?verdict, "auto-continue judge verdict");
            verdict
        }
        Ok(Err(e)) => {
            warn!("auto-continue judge failed: {e}");
            JudgeVerdict::Stop
        }
        Err(_) => {
            warn!("auto-continue judge timed out");
            JudgeVerdict::Stop
        }
    }
}

/// Serialize the trailing messages up to roughly `budget` tokens.
fn conversation_tail(messages: &[Message], budget: usize) -> String {
    let mut taken: Vec<String> = Vec::new();
    let mut used = 0;
    for m in messages.iter().rev() {
        let cost = m.approx_tokens();
        if used + cost > budget && !taken.is_empty() {
            break;
        }
        used += cost;
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        taken.push(format!("{role}: {}", m.content));
    }
    taken.reverse();
    taken.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
