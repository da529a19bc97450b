// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use skald_session::Session;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Execution statistics attached to a tool result for summarization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecMetadata {
    pub duration_ms: u64,
    pub bytes: usize,
    pub lines: usize,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content fed back to the model.
    pub content: String,
    /// If true, the tool execution failed non-fatally (returned error message).
    pub is_error: bool,
    /// Optional short form for frontends that render tool results compactly.
    pub ui_hint: Option<String>,
    pub metadata: Option<ExecMetadata>,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            ui_hint: None,
            metadata: None,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
            ui_hint: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ExecMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_ui_hint(mut self, hint: impl Into<String>) -> Self {
        self.ui_hint = Some(hint.into());
        self
    }
}

// ─── Authorization contract ──────────────────────────────────────────────────

/// What a tool wants authorized before it runs.  The fingerprint is the
/// canonical cache key for the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// A shell command; fingerprinted by its prefix.
    Command { command: String },
    /// Outbound network to a domain.
    Domain { domain: String },
    /// A sandboxed execution, keyed by a parameter hash.
    Sandbox { fingerprint: String },
    /// Writing a particular file.
    FileWrite { path: PathBuf },
}

impl AuthRequest {
    /// Canonical key used for caching and judge-call coalescing.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Command { command } => format!("command:{command}"),
            Self::Domain { domain } => format!("domain:{domain}"),
            Self::Sandbox { fingerprint } => format!("sandbox:{fingerprint}"),
            Self::FileWrite { path } => format!("file:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    /// Allowed, and the given prefix pattern was learned for future calls.
    AllowedWithPrefix(String),
    Denied { reason: String },
}

/// Decides whether a tool invocation may proceed.  Implemented by the
/// authorization actor; injected here so the tools crate holds no
/// back-pointer into the guard layer.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, req: AuthRequest) -> AuthDecision;
}

/// Immutable view of the domain blocklist.
pub trait DomainPolicy: Send + Sync {
    fn is_blocked(&self, domain: &str) -> bool;
}

/// Permissive implementation of both contracts, for tests and for runs
/// where no guard actors are configured.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _req: AuthRequest) -> AuthDecision {
        AuthDecision::Allowed
    }
}

impl DomainPolicy for AllowAll {
    fn is_blocked(&self, _domain: &str) -> bool {
        false
    }
}

// ─── Execution context ───────────────────────────────────────────────────────

/// Everything a tool may need at execution time, assembled once per session.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub session: Arc<Mutex<Session>>,
    pub authorizer: Arc<dyn Authorizer>,
    pub domains: Arc<dyn DomainPolicy>,
}

impl ToolContext {
    /// Context with permissive guards, rooted at `working_dir`.
    pub fn permissive(working_dir: impl Into<PathBuf>, session: Arc<Mutex<Session>>) -> Self {
        Self {
            working_dir: working_dir.into(),
            session,
            authorizer: Arc::new(AllowAll),
            domains: Arc::new(AllowAll),
        }
    }
}

/// Resolve a tool-supplied path against the session working directory.
pub fn resolve_path(working_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        working_dir.join(p)
    }
}

// ─── Tool trait ──────────────────────────────────────────────────────────────

/// Trait that every built-in and user-defined tool must implement.
///
/// The dispatcher — not the tool — enforces the cross-cutting preconditions:
/// read-before-edit, create-must-not-exist, and the authorization
/// round-trip.  Tools declare what they touch through the `*_path` and
/// `authorization_request` hooks and otherwise only implement `execute`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// The existing file this invocation would modify, if any.
    fn edits_path(&self, _args: &Value) -> Option<PathBuf> {
        None
    }
    /// The new file this invocation would create, if any.
    fn creates_path(&self, _args: &Value) -> Option<PathBuf> {
        None
    }
    /// The authorization this invocation needs, if any.
    fn authorization_request(&self, _args: &Value) -> Option<AuthRequest> {
        None
    }
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
