// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Optional pre-loop planning sub-agent.
//!
//! Before the main loop starts, the planner can decompose the user's
//! prompt into steps.  When the model needs clarification it emits
//! `QUESTION:` lines; each is routed through the user-interaction actor
//! and the answers feed a second planning pass.  The resulting plan is
//! prepended to the conversation as context.

use std::sync::Arc;

use tracing::debug;

use skald_guard::{InteractionKind, InteractionRequest, Interactions};
use skald_model::{CompletionRequest, Message, ModelProvider};

/// How long the user gets to answer one planning question.
const QUESTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);

const PLANNING_PROMPT: &str = "You are a planning assistant for a coding agent. \
     Decompose the user's request into a short ordered list of concrete steps. \
     If something essential is ambiguous, ask — emit one line per question in the \
     form 'QUESTION: <text>' and nothing else. Otherwise reply with the plan as \
     a numbered list, no preamble.";

pub struct Planner {
    model: Arc<dyn ModelProvider>,
    interactions: Option<Interactions>,
}

impl Planner {
    pub fn new(model: Arc<dyn ModelProvider>, interactions: Option<Interactions>) -> Self {
        Self {
            model,
            interactions,
        }
    }

    /// Produce a plan for `prompt`, or `None` when planning yields nothing.
    pub async fn plan(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        let first = self
            .model
            .complete(CompletionRequest {
                system: Some(PLANNING_PROMPT.to_string()),
                messages: vec![Message::user(prompt)],
                tools: vec![],
            })
            .await?;

        let questions = extract_questions(&first.content);
        if questions.is_empty() {
            let plan = first.content.trim().to_string();
            return Ok((!plan.is_empty()).then_some(plan));
        }

        // Clarify, then plan again with the answers in hand.  Without an
        // interaction channel the questions go unanswered and the first
        // response minus the questions is the best we can do.
        let Some(interactions) = &self.interactions else {
            debug!("planner had questions but no interaction channel; skipping plan");
            return Ok(None);
        };

        let mut qa = Vec::with_capacity(questions.len());
        for question in &questions {
            let mut request = InteractionRequest::new(
                InteractionKind::PlanningQuestion,
                serde_json::json!({ "question": question }),
            );
            request.timeout = Some(QUESTION_TIMEOUT);
            let response = interactions.ask(request).await;
            if response.cancelled || response.timed_out {
                return Ok(None);
            }
            let answer = response.answer.unwrap_or_else(|| "no answer".to_string());
            qa.push(format!("Q: {question}\nA: {answer}"));
        }

        let second = self
            .model
            .complete(CompletionRequest {
                system: Some(PLANNING_PROMPT.to_string()),
                messages: vec![Message::user(format!(
                    "{prompt}\n\nClarifications:\n{}",
                    qa.join("\n")
                ))],
                tools: vec![],
            })
            .await?;
        let plan = second.content.trim().to_string();
        Ok((!plan.is_empty()).then_some(plan))
    }
}

fn extract_questions(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("QUESTION:"))
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
