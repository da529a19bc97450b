// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::shell::{ShellControl, ShellOptions, ShellRunner};
use crate::tool::{resolve_path, AuthRequest, Tool, ToolCall, ToolContext, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;
/// Lines kept from the head of oversized output.
const HEAD_LINES: usize = 100;
/// Lines kept from the tail.  Errors and summaries almost always appear at
/// the end of build/test output, so the tail matters at least as much as
/// the head.
const TAIL_LINES: usize = 100;

/// Frontend-facing registry of in-flight shell calls.
///
/// The daemon (or CLI) resolves a user's "move to background" action by
/// calling [`ShellControls::background`] with the tool-call id shown in the
/// progress stream.
#[derive(Clone, Default)]
pub struct ShellControls {
    inner: Arc<Mutex<HashMap<String, mpsc::Sender<ShellControl>>>>,
}

impl ShellControls {
    fn register(&self, call_id: &str) -> mpsc::Receiver<ShellControl> {
        let (tx, rx) = mpsc::channel(1);
        self.inner.lock().unwrap().insert(call_id.to_string(), tx);
        rx
    }

    fn deregister(&self, call_id: &str) {
        self.inner.lock().unwrap().remove(call_id);
    }

    /// Ask the identified in-flight call to detach into the background.
    /// Returns false when no such call is running.
    pub async fn background(&self, call_id: &str) -> bool {
        let tx = self.inner.lock().unwrap().get(call_id).cloned();
        match tx {
            Some(tx) => tx.send(ShellControl::Background).await.is_ok(),
            None => false,
        }
    }
}

/// Built-in tool that runs a shell command.
pub struct ShellTool {
    runner: Arc<ShellRunner>,
    default_timeout: Duration,
    controls: ShellControls,
}

impl ShellTool {
    pub fn new(runner: Arc<ShellRunner>, default_timeout: Duration, controls: ShellControls) -> Self {
        Self {
            runner,
            default_timeout,
            controls,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         'command' is required and can be any shell one-liner.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100 lines are\n\
         preserved with an omission marker in the middle.\n\
         Prefer non-interactive commands; avoid commands that require a TTY.\n\
         Long-running commands can be moved to the background by the user, in which\n\
         case this returns {job_id, pid} immediately; use job_status / stop_job to\n\
         manage the detached job.\n\
         Set timeout_secs for slow builds or tests; on timeout the whole process\n\
         group is killed and the partial output is returned with timeout: true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to the session working directory)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn authorization_request(&self, args: &Value) -> Option<AuthRequest> {
        args.get("command").and_then(|v| v.as_str()).map(|c| {
            AuthRequest::Command {
                command: c.to_string(),
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(command) = call.args.get("command").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'command' argument");
        };
        let workdir = call
            .args
            .get("workdir")
            .and_then(|v| v.as_str())
            .map(|w| resolve_path(&ctx.working_dir, w))
            .unwrap_or_else(|| ctx.working_dir.clone());
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        debug!(cmd = %command, "executing shell tool");

        let jobs = ctx.session.lock().await.jobs.clone();
        let mut control = self.controls.register(&call.id);
        let result = self
            .runner
            .run(
                ShellOptions {
                    command: command.to_string(),
                    working_dir: Some(workdir),
                    timeout,
                },
                &mut control,
                &jobs,
            )
            .await;
        self.controls.deregister(&call.id);

        let outcome = match result {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };

        if let Some(job) = &outcome.background {
            let body = json!({
                "job_id": job.job_id,
                "pid": job.pid,
                "message": "command moved to background; poll with job_status",
            });
            return ToolOutput::ok(&call.id, body.to_string())
                .with_ui_hint(format!("backgrounded as {}", job.job_id))
                .with_metadata(outcome.metadata);
        }

        if outcome.timed_out {
            let body = json!({
                "stdout": outcome.stdout.join("\n"),
                "exit_code": outcome.exit_code,
                "timeout": true,
            });
            return ToolOutput::err(&call.id, body.to_string()).with_metadata(outcome.metadata);
        }

        let mut content = String::new();
        if !outcome.stdout.is_empty() {
            content.push_str(&head_tail_truncate(&outcome.stdout.join("\n")));
        }
        if !outcome.stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&head_tail_truncate(&outcome.stderr.join("\n")));
        }
        let code = outcome.exit_code.unwrap_or(-1);
        if content.is_empty() {
            content = format!("[exit {code}]");
        }

        let output = if code == 0 {
            ToolOutput::ok(&call.id, content)
        } else if code == 1 {
            // Exit code 1 is the Unix convention for "no matches" (grep/rg),
            // "condition false" (test/[), and similar non-fatal empty results.
            // Flagging it as an error confuses the model into believing the
            // command itself failed.
            ToolOutput::ok(&call.id, format!("[exit 1]\n{content}"))
        } else {
            ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
        };
        output.with_metadata(outcome.metadata)
    }
}

/// Truncate to fit `OUTPUT_LIMIT_BYTES`, keeping the head and tail lines
/// with an omission marker in between.
fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let lines: Vec<&str> = s.lines().collect();
    if lines.len() <= HEAD_LINES + TAIL_LINES {
        // Few but huge lines: hard cut at the byte limit on a char boundary.
        let mut cut = OUTPUT_LIMIT_BYTES;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        return format!("{}\n[... {} bytes omitted ...]", &s[..cut], s.len() - cut);
    }
    let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[lines.len() - TAIL_LINES..].join("\n");
    format!("{head}\n[... {omitted} lines omitted ...]\n{tail}")
}

// ─── Job management tools ─────────────────────────────────────────────────────

/// Query a background job by id.
pub struct JobStatusTool;

#[async_trait]
impl Tool for JobStatusTool {
    fn name(&self) -> &str {
        "job_status"
    }

    fn description(&self) -> &str {
        "Report the status of a background job started by the shell tool: \
         whether it is still running, its exit code, and the tail of its output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": { "type": "string", "description": "The job id returned when the command was backgrounded" }
            },
            "required": ["job_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(job_id) = call.args.get("job_id").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'job_id' argument");
        };
        let jobs = ctx.session.lock().await.jobs.clone();
        let Some(job) = jobs.get(job_id) else {
            return ToolOutput::err(&call.id, format!("unknown job: {job_id}"));
        };
        let rec = job.status();
        let tail: Vec<&String> = rec.stdout.iter().rev().take(20).rev().collect();
        let body = json!({
            "job_id": rec.id,
            "pid": rec.pid,
            "command": rec.command,
            "running": !rec.completed,
            "exit_code": rec.exit_code,
            "stdout_lines": rec.stdout.len(),
            "stderr_lines": rec.stderr.len(),
            "stdout_tail": tail,
        });
        ToolOutput::ok(&call.id, body.to_string())
    }
}

/// Stop a background job (SIGTERM, then SIGKILL after a grace period).
pub struct StopJobTool {
    runner: Arc<ShellRunner>,
}

impl StopJobTool {
    pub fn new(runner: Arc<ShellRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for StopJobTool {
    fn name(&self) -> &str {
        "stop_job"
    }

    fn description(&self) -> &str {
        "Stop a background job started by the shell tool. Sends SIGTERM to the \
         job's process group and escalates to SIGKILL if it does not exit \
         within the grace period."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": { "type": "string", "description": "The job to stop" }
            },
            "required": ["job_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(job_id) = call.args.get("job_id").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'job_id' argument");
        };
        let jobs = ctx.session.lock().await.jobs.clone();
        let Some(job) = jobs.get(job_id) else {
            return ToolOutput::err(&call.id, format!("unknown job: {job_id}"));
        };
        self.runner.stop_job(&job).await;
        let rec = job.status();
        let body = json!({
            "job_id": rec.id,
            "completed": rec.completed,
            "exit_code": rec.exit_code,
        });
        ToolOutput::ok(&call.id, body.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use tokio::sync::Mutex as AsyncMutex;

    use skald_session::Session;

    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new(
            Arc::new(ShellRunner::default()),
            Duration::from_secs(10),
            ShellControls::default(),
        )
    }

    fn ctx() -> ToolContext {
        ToolContext::permissive("/tmp", Arc::new(AsyncMutex::new(Session::new("/tmp"))))
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: "shell".into(),
            args,
        }
    }

    #[tokio::test]
    async fn executes_echo_and_returns_stdout() {
        let out = tool().execute(&ctx(), &call(json!({"command": "echo hello"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("hello"));
        assert!(out.metadata.is_some());
    }

    #[tokio::test]
    async fn captures_stderr() {
        let out = tool().execute(&ctx(), &call(json!({"command": "echo err >&2"}))).await;
        assert!(out.content.contains("[stderr]"));
        assert!(out.content.contains("err"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_error() {
        let out = tool().execute(&ctx(), &call(json!({"command": "exit 7"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 7]"));
    }

    #[tokio::test]
    async fn exit_one_is_not_an_error() {
        let out = tool().execute(&ctx(), &call(json!({"command": "exit 1"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let out = tool().execute(&ctx(), &call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing 'command'"));
    }

    #[tokio::test]
    async fn timeout_returns_structured_result() {
        let out = tool()
            .execute(
                &ctx(),
                &call(json!({"command": "sleep 30", "timeout_secs": 1})),
            )
            .await;
        assert!(out.is_error);
        let body: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(body["timeout"], true);
    }

    #[tokio::test]
    async fn background_lifecycle_via_controls() {
        let controls = ShellControls::default();
        let runner = Arc::new(ShellRunner::default());
        let shell = ShellTool::new(Arc::clone(&runner), Duration::from_secs(60), controls.clone());
        let ctx = ctx();

        // Detach the call shortly after it starts.
        let bg = {
            let controls = controls.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    if controls.background("t1").await {
                        return true;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                false
            })
        };
        let out = shell
            .execute(&ctx, &call(json!({"command": "sleep 20"})))
            .await;
        assert!(bg.await.unwrap());
        assert!(!out.is_error);
        let body: Value = serde_json::from_str(&out.content).unwrap();
        let job_id = body["job_id"].as_str().unwrap().to_string();
        assert!(body["pid"].as_u64().unwrap() > 0);

        // Status reports running.
        let status = JobStatusTool
            .execute(
                &ctx,
                &ToolCall {
                    id: "t2".into(),
                    name: "job_status".into(),
                    args: json!({"job_id": job_id}),
                },
            )
            .await;
        let status_body: Value = serde_json::from_str(&status.content).unwrap();
        assert_eq!(status_body["running"], true);

        // Stop terminates within the grace window.
        let stop = StopJobTool::new(runner)
            .execute(
                &ctx,
                &ToolCall {
                    id: "t3".into(),
                    name: "stop_job".into(),
                    args: json!({"job_id": job_id}),
                },
            )
            .await;
        let stop_body: Value = serde_json::from_str(&stop.content).unwrap();
        assert_eq!(stop_body["completed"], true);
        assert_eq!(stop_body["exit_code"], 143);
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let out = JobStatusTool
            .execute(
                &ctx(),
                &ToolCall {
                    id: "t1".into(),
                    name: "job_status".into(),
                    args: json!({"job_id": "nope"}),
                },
            )
            .await;
        assert!(out.is_error);
    }

    #[test]
    fn head_tail_keeps_both_ends() {
        let big: String = (0..5000).map(|i| format!("line-{i}\n")).collect();
        let cut = head_tail_truncate(&big);
        assert!(cut.len() < big.len());
        assert!(cut.contains("line-0"));
        assert!(cut.contains("line-4999"));
        assert!(cut.contains("omitted"));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(head_tail_truncate("hello"), "hello");
    }

    #[test]
    fn shell_declares_command_fingerprint() {
        let t = tool();
        let req = t.authorization_request(&json!({"command": "git status"}));
        assert_eq!(
            req,
            Some(AuthRequest::Command {
                command: "git status".into()
            })
        );
    }
}
