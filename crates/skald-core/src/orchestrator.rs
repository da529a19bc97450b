// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The orchestration loop.
//!
//! One conversation turn: build the request (system prompt + message log +
//! tool schemas), call the model, append the assistant message, execute any
//! tool calls through the dispatcher, append the results in call order, and
//! repeat.  Each iteration reduces to one [`IterationOutcome`]; the loop is
//! a match over that value and nothing else.
//!
//! ```text
//!   user prompt ─► [compaction gate] ─► model ─► tool calls? ──► dispatch ─► Continue
//!                        │                │          no
//!                        │cap             │                ┌──► BreakWithAutoContinue
//!                        ▼                ▼                │
//!                 context_exhausted   detector/judge ──────┴──► Break / BreakLoopDetected
//! ```
//!
//! All counters (iterations, auto-continues, consecutive compactions,
//! detector window) reset at the start of each user prompt.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use skald_config::AgentConfig;
use skald_model::{
    complete_with_retry, CompletionRequest, JudgeVerdict, Message, ModelProvider,
    ToolCallDescriptor,
};
use skald_tools::{Dispatcher, ToolCall, ToolContext};

use crate::compact::{compact_messages, estimate_prompt_tokens, needs_compaction};
use crate::detector::RepetitionDetector;
use crate::events::ProgressEvent;
use crate::judge::auto_continue_verdict;
use crate::outcome::{IterationOutcome, TerminationReason};

/// Synthetic user prompt used to re-enter the loop after an auto-continue.
const AUTO_CONTINUE_PROMPT: &str = "continue";

/// LLM transport retries per call.
const MODEL_RETRIES: u32 = 3;

/// Construction-time dependency bundle.  The orchestrator, tools, session,
/// and guard actors reference each other only through this bundle and the
/// contracts inside it — no back-pointers.
#[derive(Clone)]
pub struct AgentServices {
    pub model: Arc<dyn ModelProvider>,
    /// Small model for auto-continue verdicts and compaction summaries.
    pub judge: Option<Arc<dyn ModelProvider>>,
    pub dispatcher: Dispatcher,
    pub progress: mpsc::Sender<ProgressEvent>,
}

/// What a finished turn reports back to the frontend layer.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub reason: TerminationReason,
    pub final_text: String,
    pub iterations: u32,
}

struct LoopState {
    iterations: u32,
    auto_continues: u32,
    consecutive_compactions: u32,
    final_text: String,
}

pub struct Orchestrator {
    services: AgentServices,
    config: AgentConfig,
    system_prompt: String,
    detector: RepetitionDetector,
}

impl Orchestrator {
    pub fn new(services: AgentServices, config: AgentConfig, system_prompt: String) -> Self {
        Self {
            services,
            config,
            system_prompt,
            detector: RepetitionDetector::new(),
        }
    }

    async fn emit(&self, event: ProgressEvent) {
        let _ = self.services.progress.send(event).await;
    }

    /// Run one user prompt to completion.
    ///
    /// `cancel` is the turn's context: resolving (or dropping) the sender
    /// stops the loop at the next suspension point.  Background jobs that
    /// tools detached are deliberately not touched by cancellation.
    pub async fn run_prompt(
        &mut self,
        ctx: &ToolContext,
        prompt: &str,
        cancel: &mut oneshot::Receiver<()>,
    ) -> TurnResult {
        self.detector.reset();
        let mut state = LoopState {
            iterations: 0,
            auto_continues: 0,
            consecutive_compactions: 0,
            final_text: String::new(),
        };

        if let Err(e) = ctx.session.lock().await.push(Message::user(prompt)) {
            return self.finish(&state, TerminationReason::Error(e.to_string())).await;
        }

        loop {
            if cancelled(cancel) {
                return self.finish(&state, TerminationReason::Cancelled).await;
            }

            let outcome = self.run_iteration(ctx, cancel, &mut state).await;
            debug!(?outcome, iteration = state.iterations, "iteration outcome");
            match outcome {
                IterationOutcome::Continue => {}
                IterationOutcome::CompactionNeeded => {}
                IterationOutcome::BreakWithAutoContinue => {
                    state.auto_continues += 1;
                    self.emit(ProgressEvent::AutoContinue {
                        count: state.auto_continues,
                    })
                    .await;
                    if let Err(e) = ctx
                        .session
                        .lock()
                        .await
                        .push(Message::user(AUTO_CONTINUE_PROMPT))
                    {
                        return self
                            .finish(&state, TerminationReason::Error(e.to_string()))
                            .await;
                    }
                }
                IterationOutcome::Break => {
                    return self.finish(&state, TerminationReason::Done).await;
                }
                IterationOutcome::BreakMaxIterations => {
                    return self.finish(&state, TerminationReason::MaxIterations).await;
                }
                IterationOutcome::BreakLoopDetected { pattern } => {
                    return self
                        .finish(&state, TerminationReason::LoopDetected { pattern })
                        .await;
                }
                IterationOutcome::Error(e) => {
                    if cancelled(cancel) {
                        return self.finish(&state, TerminationReason::Cancelled).await;
                    }
                    self.emit(ProgressEvent::Error(e.clone())).await;
                    return self.finish(&state, TerminationReason::Error(e)).await;
                }
            }
        }
    }

    async fn finish(&self, state: &LoopState, reason: TerminationReason) -> TurnResult {
        info!(%reason, iterations = state.iterations, "turn finished");
        self.emit(ProgressEvent::Terminated {
            reason: reason.clone(),
        })
        .await;
        TurnResult {
            reason,
            final_text: state.final_text.clone(),
            iterations: state.iterations,
        }
    }

    /// One pass through the state machine.
    async fn run_iteration(
        &mut self,
        ctx: &ToolContext,
        cancel: &mut oneshot::Receiver<()>,
        state: &mut LoopState,
    ) -> IterationOutcome {
        let schemas = self.services.dispatcher.registry().schemas();
        let messages = ctx.session.lock().await.messages().to_vec();

        // Compaction gate, checked before every model call.
        let estimated = estimate_prompt_tokens(&self.system_prompt, &messages, &schemas);
        let window = self.services.model.context_window();
        if needs_compaction(estimated, window, self.config.compaction_threshold) {
            if state.consecutive_compactions >= self.config.max_consecutive_compactions {
                warn!(
                    estimated,
                    window, "context still over budget after maximum compactions"
                );
                return IterationOutcome::Error("context_exhausted".into());
            }
            state.consecutive_compactions += 1;
            let compacted = compact_messages(
                self.services.judge.as_ref(),
                &messages,
                self.config.compaction_keep_recent,
            )
            .await;
            let tokens_after = estimate_prompt_tokens(&self.system_prompt, &compacted, &schemas);
            ctx.session.lock().await.replace_messages(compacted);
            self.emit(ProgressEvent::ContextCompacted {
                tokens_before: estimated,
                tokens_after,
                iteration: state.iterations,
            })
            .await;
            return IterationOutcome::CompactionNeeded;
        }

        if state.iterations >= self.config.max_iterations {
            return IterationOutcome::BreakMaxIterations;
        }
        state.iterations += 1;

        let request = CompletionRequest {
            system: Some(self.system_prompt.clone()),
            messages,
            tools: schemas,
        };
        let response = tokio::select! {
            biased;
            _ = &mut *cancel => return IterationOutcome::Error("cancelled".into()),
            r = complete_with_retry(self.services.model.as_ref(), request, MODEL_RETRIES) => r,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => return IterationOutcome::Error(format!("model call failed: {e}")),
        };
        // A model call went through; compactions are no longer consecutive.
        state.consecutive_compactions = 0;

        self.detector.observe(&response.content);

        let tool_calls = self.dedup_call_ids(ctx, response.tool_calls.clone()).await;
        let assistant =
            Message::assistant_with_tool_calls(&response.content, tool_calls.clone());
        let assistant = Message {
            reasoning: response.reasoning.clone(),
            ..assistant
        };
        if let Err(e) = ctx.session.lock().await.push(assistant) {
            return IterationOutcome::Error(format!("appending assistant message: {e}"));
        }
        if !response.content.is_empty() || response.reasoning.is_some() {
            self.emit(ProgressEvent::AssistantMessage {
                content: response.content.clone(),
                reasoning: response.reasoning.clone(),
            })
            .await;
        }

        // Loop health beats everything else, tool calls included.
        if let Some(pattern) = self.detector.check() {
            return IterationOutcome::BreakLoopDetected { pattern };
        }

        if !tool_calls.is_empty() {
            // A real working round: the auto-continue chain is broken.
            state.auto_continues = 0;
            return self.run_tool_calls(ctx, cancel, &tool_calls).await;
        }

        state.final_text = response.content.clone();
        if response.content.is_empty() {
            return IterationOutcome::Break;
        }

        let messages = ctx.session.lock().await.messages().to_vec();
        let verdict = auto_continue_verdict(
            self.services.judge.as_ref(),
            &self.system_prompt,
            &messages,
            &response.content,
            false,
        )
        .await;
        match verdict {
            JudgeVerdict::Continue if state.auto_continues < self.config.max_auto_continues => {
                IterationOutcome::BreakWithAutoContinue
            }
            JudgeVerdict::Continue => {
                // Exceeding the cap forces termination.
                warn!(
                    cap = self.config.max_auto_continues,
                    "auto-continue budget exhausted"
                );
                IterationOutcome::Break
            }
            JudgeVerdict::Stop => IterationOutcome::Break,
        }
    }

    async fn run_tool_calls(
        &self,
        ctx: &ToolContext,
        cancel: &mut oneshot::Receiver<()>,
        descriptors: &[ToolCallDescriptor],
    ) -> IterationOutcome {
        let calls: Vec<ToolCall> = descriptors
            .iter()
            .map(|d| ToolCall {
                id: d.id.clone(),
                name: d.name.clone(),
                args: d.arguments.clone(),
            })
            .collect();
        for call in &calls {
            self.emit(ProgressEvent::ToolCallStarted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.args.clone(),
            })
            .await;
        }

        let outputs = tokio::select! {
            biased;
            _ = &mut *cancel => return IterationOutcome::Error("cancelled".into()),
            outputs = self.services.dispatcher.execute_turn(ctx, &calls) => outputs,
        };

        // Results are appended in the order of their calls.
        for (call, output) in calls.iter().zip(outputs.iter()) {
            self.emit(ProgressEvent::ToolCallFinished {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                output: output.content.clone(),
                is_error: output.is_error,
            })
            .await;
            let msg = Message::tool_result(&call.id, &call.name, &output.content);
            if let Err(e) = ctx.session.lock().await.push(msg) {
                return IterationOutcome::Error(format!("appending tool result: {e}"));
            }
        }
        IterationOutcome::Continue
    }

    /// Rewrite tool-call ids a misbehaving model reused; the session's
    /// invariants reject duplicates outright.
    async fn dedup_call_ids(
        &self,
        ctx: &ToolContext,
        mut calls: Vec<ToolCallDescriptor>,
    ) -> Vec<ToolCallDescriptor> {
        let session = ctx.session.lock().await;
        let mut seen_now: std::collections::HashSet<String> = std::collections::HashSet::new();
        for call in &mut calls {
            if call.id.is_empty()
                || session.tool_id_declared(&call.id)
                || !seen_now.insert(call.id.clone())
            {
                let fresh = format!("tc_{}", uuid::Uuid::new_v4().simple());
                warn!(old = %call.id, new = %fresh, "rewriting duplicate tool-call id");
                call.id = fresh.clone();
                seen_now.insert(fresh);
            }
        }
        calls
    }
}

fn cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    // Both an explicit send and a dropped sender count as cancellation.
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use skald_model::{CompletionResponse, Role, ScriptedMockProvider};
    use skald_session::Session;
    use skald_tools::{Tool, ToolOutput, ToolRegistry};

    use super::*;

    /// Stand-in shell tool with canned output, keeping loop tests hermetic.
    struct FakeShell;

    #[async_trait]
    impl Tool for FakeShell {
        fn name(&self) -> &str {
            "shell"
        }
        fn description(&self) -> &str {
            "canned shell"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "a.txt\nb.txt\n")
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        ctx: ToolContext,
        events: mpsc::Receiver<ProgressEvent>,
    }

    fn fixture(
        scripts: Vec<CompletionResponse>,
        judge_scripts: Option<Vec<CompletionResponse>>,
        config: AgentConfig,
        context_window: usize,
    ) -> Fixture {
        let model = Arc::new(
            ScriptedMockProvider::new(scripts).with_context_window(context_window),
        );
        let judge: Option<Arc<dyn ModelProvider>> = judge_scripts
            .map(|s| Arc::new(ScriptedMockProvider::new(s)) as Arc<dyn ModelProvider>);
        let mut registry = ToolRegistry::new();
        registry.register(FakeShell);
        let dispatcher = Dispatcher::new(Arc::new(registry), config.tool_parallelism);
        let (progress, events) = mpsc::channel(256);
        let services = AgentServices {
            model,
            judge,
            dispatcher,
            progress,
        };
        let ctx = ToolContext::permissive(
            "/tmp",
            Arc::new(Mutex::new(Session::new("/tmp"))),
        );
        Fixture {
            orchestrator: Orchestrator::new(services, config, "You are a coding agent.".into()),
            ctx,
            events,
        }
    }

    fn never_cancel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
        oneshot::channel()
    }

    #[tokio::test]
    async fn read_only_happy_path_produces_four_messages() {
        let mut fx = fixture(
            vec![
                CompletionResponse::with_tool_call("", "c1", "shell", json!({"command": "ls"})),
                CompletionResponse::text("There are 2 files: a.txt, b.txt."),
            ],
            Some(vec![CompletionResponse::text("STOP")]),
            AgentConfig::default(),
            128_000,
        );
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "list files", &mut cancel)
            .await;

        assert_eq!(result.reason, TerminationReason::Done);
        assert_eq!(result.final_text, "There are 2 files: a.txt, b.txt.");
        assert_eq!(result.iterations, 2);

        let session = fx.ctx.session.lock().await;
        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[1].has_tool_calls());
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_id.as_deref(), Some("c1"));
        assert_eq!(messages[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn trailing_colon_auto_continues_without_judge() {
        // The judge script holds only the STOP for the second round; the
        // first round's colon shortcut must not consume anything.
        let mut fx = fixture(
            vec![
                CompletionResponse::text("Here is the plan:\n"),
                CompletionResponse::text("All steps are complete."),
            ],
            Some(vec![CompletionResponse::text("STOP")]),
            AgentConfig::default(),
            128_000,
        );
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "make a plan", &mut cancel)
            .await;

        assert_eq!(result.reason, TerminationReason::Done);
        assert_eq!(result.iterations, 2);
        let session = fx.ctx.session.lock().await;
        let synthetic: Vec<&Message> = session
            .messages()
            .iter()
            .filter(|m| m.role == Role::User && m.content == "continue")
            .collect();
        assert_eq!(synthetic.len(), 1);

        // An AutoContinue event was emitted with count 1.
        let mut saw_auto_continue = false;
        while let Ok(ev) = fx.events.try_recv() {
            if let ProgressEvent::AutoContinue { count } = ev {
                saw_auto_continue = true;
                assert_eq!(count, 1);
            }
        }
        assert!(saw_auto_continue);
    }

    #[tokio::test]
    async fn repetition_trap_terminates_with_pattern() {
        let scripts: Vec<CompletionResponse> = (0..10)
            .map(|_| CompletionResponse::text("Let me try again."))
            .collect();
        // Rounds 1–9 ask the judge; provide CONTINUE so the loop re-enters.
        let judge_scripts: Vec<CompletionResponse> = (0..9)
            .map(|_| CompletionResponse::text("CONTINUE"))
            .collect();
        let mut fx = fixture(
            scripts,
            Some(judge_scripts),
            AgentConfig::default(),
            128_000,
        );
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "fix the bug", &mut cancel)
            .await;

        match result.reason {
            TerminationReason::LoopDetected { pattern } => {
                assert_eq!(pattern, "Let me try again");
            }
            other => panic!("expected loop_detected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn max_iterations_ends_even_when_model_wants_tools() {
        let scripts: Vec<CompletionResponse> = (0..5)
            .map(|i| {
                CompletionResponse::with_tool_call(
                    "",
                    format!("c{i}"),
                    "shell",
                    json!({"command": "ls"}),
                )
            })
            .collect();
        let config = AgentConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let mut fx = fixture(scripts, None, config, 128_000);
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "loop forever", &mut cancel)
            .await;
        assert_eq!(result.reason, TerminationReason::MaxIterations);
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn over_budget_prompt_exhausts_compaction_cap() {
        // A 100-token window that even a compacted conversation overflows.
        let mut fx = fixture(vec![], None, AgentConfig::default(), 100);
        let (_keep, mut cancel) = never_cancel();
        let big_prompt = "x".repeat(4_000);
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, &big_prompt, &mut cancel)
            .await;
        assert_eq!(
            result.reason,
            TerminationReason::Error("context_exhausted".into())
        );
    }

    #[tokio::test]
    async fn compaction_then_normal_round() {
        // Window small enough that the long history triggers one compaction,
        // large enough that the compacted form fits.
        let mut fx = fixture(
            vec![CompletionResponse::text("done after compaction")],
            Some(vec![
                CompletionResponse::text("MIDDLE SUMMARY"),
                CompletionResponse::text("STOP"),
            ]),
            AgentConfig {
                compaction_keep_recent: 2,
                ..Default::default()
            },
            600,
        );
        // Seed a long history so the gate trips immediately.
        {
            let mut session = fx.ctx.session.lock().await;
            session.push(Message::user("original task")).unwrap();
            for i in 0..40 {
                session
                    .push(Message::assistant(format!("progress note {i} {}", "y".repeat(40))))
                    .unwrap();
            }
        }
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "wrap up", &mut cancel)
            .await;

        assert_eq!(result.reason, TerminationReason::Done);
        let session = fx.ctx.session.lock().await;
        assert!(session
            .messages()
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("MIDDLE SUMMARY")));

        let mut saw_compaction = false;
        while let Ok(ev) = fx.events.try_recv() {
            if let ProgressEvent::ContextCompacted {
                tokens_before,
                tokens_after,
                ..
            } = ev
            {
                saw_compaction = true;
                assert!(tokens_after < tokens_before);
            }
        }
        assert!(saw_compaction);
    }

    #[tokio::test]
    async fn pre_resolved_cancel_stops_immediately() {
        let mut fx = fixture(
            vec![CompletionResponse::text("should not matter")],
            None,
            AgentConfig::default(),
            128_000,
        );
        let (tx, mut cancel) = oneshot::channel();
        tx.send(()).unwrap();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "anything", &mut cancel)
            .await;
        assert_eq!(result.reason, TerminationReason::Cancelled);
    }

    #[tokio::test]
    async fn model_error_after_retries_surfaces() {
        // Empty script: every call errors, retries exhaust.
        let mut fx = fixture(vec![], None, AgentConfig::default(), 128_000);
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "hello", &mut cancel)
            .await;
        assert!(matches!(result.reason, TerminationReason::Error(_)));
    }

    #[tokio::test]
    async fn duplicate_tool_call_ids_are_rewritten() {
        let mut fx = fixture(
            vec![
                CompletionResponse::with_tool_call("", "dup", "shell", json!({})),
                CompletionResponse::with_tool_call("", "dup", "shell", json!({})),
                CompletionResponse::text("finished"),
            ],
            Some(vec![CompletionResponse::text("STOP")]),
            AgentConfig::default(),
            128_000,
        );
        let (_keep, mut cancel) = never_cancel();
        let result = fx
            .orchestrator
            .run_prompt(&fx.ctx, "go", &mut cancel)
            .await;
        assert_eq!(result.reason, TerminationReason::Done);
        // Both tool rounds landed, with distinct ids.
        let session = fx.ctx.session.lock().await;
        let tool_ids: Vec<&str> = session
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_id.as_deref())
            .collect();
        assert_eq!(tool_ids.len(), 2);
        assert_ne!(tool_ids[0], tool_ids[1]);
    }
}
