// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool dispatch with core-enforced preconditions.
//!
//! Three checks run before any tool body:
//!
//! 1. a tool that edits an existing file fails with `file_not_read` unless
//!    the session recorded a prior read of that path;
//! 2. a tool that creates a file fails with `already_exists` when the path
//!    is already present;
//! 3. a tool that declares an authorization requirement goes through the
//!    authorizer first — a denial becomes a tool error, never a loop error.
//!
//! Dispatch is sequential by default.  `execute_turn` fans independent calls
//! of one assistant turn out to child tasks bounded by the per-turn
//! concurrency cap; results come back in call order, and a fatal (panicked)
//! sibling aborts the rest of the turn.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::registry::ToolRegistry;
use crate::tool::{resolve_path, AuthDecision, ToolCall, ToolContext, ToolOutput};

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    parallelism: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, parallelism: usize) -> Self {
        Self {
            registry,
            parallelism: parallelism.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one call with all preconditions applied.
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };

        if let Some(path) = tool.edits_path(&call.args) {
            let abs = resolve_path(&ctx.working_dir, &path.to_string_lossy());
            if abs.exists() && !ctx.session.lock().await.was_read(&abs) {
                return ToolOutput::err(
                    &call.id,
                    format!(
                        "file_not_read: {} must be read in this session before it can be edited",
                        abs.display()
                    ),
                );
            }
        }

        if let Some(path) = tool.creates_path(&call.args) {
            let abs = resolve_path(&ctx.working_dir, &path.to_string_lossy());
            if abs.exists() {
                return ToolOutput::err(
                    &call.id,
                    format!("already_exists: {} — use an editing tool instead", abs.display()),
                );
            }
        }

        if let Some(req) = tool.authorization_request(&call.args) {
            match ctx.authorizer.authorize(req).await {
                AuthDecision::Allowed | AuthDecision::AllowedWithPrefix(_) => {}
                AuthDecision::Denied { reason } => {
                    debug!(tool = %call.name, "authorization denied: {reason}");
                    return ToolOutput::err(&call.id, format!("authorization denied: {reason}"));
                }
            }
        }

        let output = tool.execute(ctx, call).await;

        if !output.is_error {
            let touched = tool
                .edits_path(&call.args)
                .or_else(|| tool.creates_path(&call.args));
            if let Some(path) = touched {
                let abs = resolve_path(&ctx.working_dir, &path.to_string_lossy());
                ctx.session.lock().await.record_modified(abs);
            }
        }
        output
    }

    /// Execute all calls of one assistant turn, preserving call order in the
    /// result vector.  With more than one call and a cap above 1, calls fan
    /// out to child tasks; a panicked call cancels its unfinished siblings.
    pub async fn execute_turn(&self, ctx: &ToolContext, calls: &[ToolCall]) -> Vec<ToolOutput> {
        if calls.len() <= 1 || self.parallelism == 1 {
            let mut outputs = Vec::with_capacity(calls.len());
            for call in calls {
                outputs.push(self.execute(ctx, call).await);
            }
            return outputs;
        }

        let limiter = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            let dispatcher = self.clone();
            let ctx = ctx.clone();
            let limiter = Arc::clone(&limiter);
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                dispatcher.execute(&ctx, &call).await
            }));
        }
        // Cancelling the turn (dropping this future) must also cancel the
        // child tasks; a bare JoinHandle would leave them running detached.
        let mut guard = AbortOnDrop::new(&tasks);

        let mut outputs: Vec<ToolOutput> = Vec::with_capacity(calls.len());
        let mut fatal = false;
        for (i, task) in tasks.into_iter().enumerate() {
            if fatal {
                task.abort();
                outputs.push(ToolOutput::err(
                    &calls[i].id,
                    "cancelled: a sibling tool call failed fatally",
                ));
                continue;
            }
            match task.await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    warn!(tool = %calls[i].name, "tool task failed fatally: {e}");
                    fatal = true;
                    outputs.push(ToolOutput::err(
                        &calls[i].id,
                        format!("tool execution panicked: {e}"),
                    ));
                }
            }
        }
        guard.defuse();
        outputs
    }
}

/// Aborts the tracked tasks when dropped before `defuse`.
struct AbortOnDrop {
    handles: Vec<tokio::task::AbortHandle>,
    armed: bool,
}

impl AbortOnDrop {
    fn new(tasks: &[tokio::task::JoinHandle<ToolOutput>]) -> Self {
        Self {
            handles: tasks.iter().map(|t| t.abort_handle()).collect(),
            armed: true,
        }
    }

    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            for handle in &self.handles {
                handle.abort();
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
