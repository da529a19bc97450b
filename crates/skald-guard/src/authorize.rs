// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Authorization actor.
//!
//! Serializes decisions for shell commands, outbound domains, sandbox
//! calls, and file writes.  The decision ladder for each request:
//!
//! 1. session cache (approvals learned earlier in this session);
//! 2. workspace config (approvals persisted for this workspace);
//! 3. CLI pre-authorization flags;
//! 4. the LLM judge, when configured — "is this harmless? suggest a prefix";
//! 5. a user-interaction round-trip carrying the suggested prefix.
//!
//! The slow tail (judge + user) runs on a child task per fingerprint;
//! concurrent requests for the same fingerprint coalesce on one in-flight
//! resolution.  Approvals with workspace scope are persisted atomically
//! through the workspace-config save path.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use skald_actor::{Actor, ActorContext, ActorRef, SpawnOptions};
use skald_config::{command_matches_prefix, domain_matches_pattern, WorkspaceConfig};
use skald_model::{CompletionRequest, Message, ModelProvider};
use skald_tools::{AuthDecision, AuthRequest, Authorizer};

use crate::interact::{InteractionKind, InteractionRequest, Interactions};

/// Ceiling for one judge call.
const JUDGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Ceiling for the user round-trip: the frontend gets 30 s to show the
/// dialog and the user 10 minutes to answer, plus slack.
const USER_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30 + 10 * 60 + 30);

const JUDGE_SYSTEM_PROMPT: &str = "You are a safety judge for a coding agent. \
     Given one operation the agent wants to perform, decide whether it is \
     harmless (read-only or trivially reversible, no data exfiltration, no \
     destructive side effects). Reply with EXACTLY one JSON object: \
     {\"safe\": true|false, \"prefix\": \"<optional pattern that covers this \
     and similar operations, e.g. 'git status' or '*.github.com'>\"}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    Session,
    Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnedKind {
    Command,
    Domain,
    Exact,
}

/// An approval pattern learned during resolution.  Public because it rides
/// in [`AuthMsg::Resolved`]; only this module constructs it.
#[derive(Debug, Clone)]
pub struct Learned {
    kind: LearnedKind,
    pattern: String,
    scope: AuthScope,
}

pub enum AuthMsg {
    Request {
        req: AuthRequest,
        reply: oneshot::Sender<AuthDecision>,
    },
    /// Internal: a judge/user resolution finished for `key`.
    Resolved {
        key: String,
        decision: AuthDecision,
        learned: Option<Learned>,
    },
}

/// Construction-time dependencies of the actor.
pub struct AuthorizationSetup {
    /// Directory holding the persisted workspace config.
    pub workspace_dir: PathBuf,
    pub workspace: WorkspaceConfig,
    /// `--allow-command` pre-authorizations.
    pub cli_commands: Vec<String>,
    /// `--allow-domain` pre-authorizations.
    pub cli_domains: Vec<String>,
    pub judge: Option<Arc<dyn ModelProvider>>,
    pub interactions: Option<Interactions>,
}

pub struct AuthorizationActor {
    setup: AuthorizationSetup,
    session_commands: Vec<String>,
    session_domains: Vec<String>,
    session_exact: HashSet<String>,
    in_flight: HashMap<String, Vec<oneshot::Sender<AuthDecision>>>,
}

impl AuthorizationActor {
    pub fn new(setup: AuthorizationSetup) -> Self {
        Self {
            setup,
            session_commands: Vec::new(),
            session_domains: Vec::new(),
            session_exact: HashSet::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Steps 1–3 of the ladder: every deterministic source, no model call.
    fn cached_decision(&self, req: &AuthRequest) -> Option<AuthDecision> {
        match req {
            AuthRequest::Command { command } => {
                let approved = self
                    .session_commands
                    .iter()
                    .any(|p| command_matches_prefix(command, p))
                    || self.setup.workspace.command_approved(command)
                    || self
                        .setup
                        .cli_commands
                        .iter()
                        .any(|p| command_matches_prefix(command, p));
                approved.then_some(AuthDecision::Allowed)
            }
            AuthRequest::Domain { domain } => {
                let approved = self
                    .session_domains
                    .iter()
                    .any(|p| domain_matches_pattern(domain, p))
                    || self.setup.workspace.domain_approved(domain)
                    || self
                        .setup
                        .cli_domains
                        .iter()
                        .any(|p| domain_matches_pattern(domain, p));
                approved.then_some(AuthDecision::Allowed)
            }
            AuthRequest::Sandbox { .. } | AuthRequest::FileWrite { .. } => self
                .session_exact
                .contains(&req.fingerprint())
                .then_some(AuthDecision::Allowed),
        }
    }

    fn apply_learned(&mut self, learned: Learned) {
        match learned.scope {
            AuthScope::Session => match learned.kind {
                LearnedKind::Command => self.session_commands.push(learned.pattern),
                LearnedKind::Domain => self.session_domains.push(learned.pattern),
                LearnedKind::Exact => {
                    self.session_exact.insert(learned.pattern);
                }
            },
            AuthScope::Workspace => {
                match learned.kind {
                    LearnedKind::Command => {
                        self.setup.workspace.authorize_command(&learned.pattern)
                    }
                    LearnedKind::Domain => self.setup.workspace.authorize_domain(&learned.pattern),
                    // Exact approvals have no workspace slot; keep them in
                    // the session cache instead.
                    LearnedKind::Exact => {
                        self.session_exact.insert(learned.pattern);
                        return;
                    }
                }
                if let Err(e) = self.setup.workspace.save(&self.setup.workspace_dir) {
                    warn!("persisting workspace approval failed: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl Actor for AuthorizationActor {
    type Msg = AuthMsg;

    async fn receive(&mut self, ctx: &ActorContext<AuthMsg>, msg: AuthMsg) -> anyhow::Result<()> {
        match msg {
            AuthMsg::Request { req, reply } => {
                if let Some(decision) = self.cached_decision(&req) {
                    debug!(fingerprint = %req.fingerprint(), "authorization from cache");
                    let _ = reply.send(decision);
                    return Ok(());
                }
                let key = req.fingerprint();
                if let Some(waiters) = self.in_flight.get_mut(&key) {
                    // Coalesce: one resolution per fingerprint.
                    waiters.push(reply);
                    return Ok(());
                }
                self.in_flight.insert(key.clone(), vec![reply]);

                let judge = self.setup.judge.clone();
                let interactions = self.setup.interactions.clone();
                let me = ctx.self_ref();
                tokio::spawn(async move {
                    let (decision, learned) = resolve(&req, judge, interactions).await;
                    let _ = me.send(AuthMsg::Resolved {
                        key,
                        decision,
                        learned,
                    });
                });
            }
            AuthMsg::Resolved {
                key,
                decision,
                learned,
            } => {
                if let Some(learned) = learned {
                    info!(pattern = %learned.pattern, scope = ?learned.scope, "authorization learned");
                    self.apply_learned(learned);
                }
                if let Some(waiters) = self.in_flight.remove(&key) {
                    for waiter in waiters {
                        let _ = waiter.send(decision.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn on_undelivered(&mut self, msg: AuthMsg) {
        if let AuthMsg::Request { reply, .. } = msg {
            let _ = reply.send(AuthDecision::Denied {
                reason: "cancelled: authorization actor stopped".into(),
            });
        }
    }
}

/// Judge + user tail of the ladder, run off the actor's mailbox.
async fn resolve(
    req: &AuthRequest,
    judge: Option<Arc<dyn ModelProvider>>,
    interactions: Option<Interactions>,
) -> (AuthDecision, Option<Learned>) {
    let mut suggested_prefix: Option<String> = None;

    if let Some(judge) = judge {
        match ask_judge(judge.as_ref(), req).await {
            Ok((true, prefix)) => {
                let pattern = prefix.clone().unwrap_or_else(|| default_pattern(req));
                let learned = Some(Learned {
                    kind: learned_kind(req),
                    pattern: pattern.clone(),
                    scope: AuthScope::Session,
                });
                let decision = match prefix {
                    Some(p) => AuthDecision::AllowedWithPrefix(p),
                    None => AuthDecision::Allowed,
                };
                return (decision, learned);
            }
            Ok((false, prefix)) => suggested_prefix = prefix,
            Err(e) => {
                // Judge failure falls through to the user prompt.
                warn!("authorization judge failed: {e}");
            }
        }
    }

    let Some(interactions) = interactions else {
        return (
            AuthDecision::Denied {
                reason: "no interactive approver available".into(),
            },
            None,
        );
    };

    let payload = json!({
        "fingerprint": req.fingerprint(),
        "description": describe(req),
        "suggested_prefix": suggested_prefix,
    });
    let mut request = InteractionRequest::new(InteractionKind::Authorization, payload);
    request.timeout = Some(USER_APPROVAL_TIMEOUT);
    let response = interactions.ask(request).await;

    if response.cancelled {
        return (
            AuthDecision::Denied {
                reason: "cancelled".into(),
            },
            None,
        );
    }
    if response.timed_out {
        return (
            AuthDecision::Denied {
                reason: "authorization request timed out".into(),
            },
            None,
        );
    }
    if response.approved != Some(true) {
        // Surface the handler's specific reason ("dialog not displayed",
        // "no attached client") when one was given.
        let reason = response
            .error
            .clone()
            .unwrap_or_else(|| "denied by user".into());
        return (AuthDecision::Denied { reason }, None);
    }

    // The user may approve a broader pattern in one click and choose its
    // scope; both ride in the answers map.
    let answers = response.answers.unwrap_or_default();
    let pattern = answers
        .get("prefix")
        .cloned()
        .or(suggested_prefix)
        .unwrap_or_else(|| default_pattern(req));
    let scope = match answers.get("scope").map(String::as_str) {
        Some("workspace") => AuthScope::Workspace,
        _ => AuthScope::Session,
    };
    (
        AuthDecision::AllowedWithPrefix(pattern.clone()),
        Some(Learned {
            kind: learned_kind(req),
            pattern,
            scope,
        }),
    )
}

fn learned_kind(req: &AuthRequest) -> LearnedKind {
    match req {
        AuthRequest::Command { .. } => LearnedKind::Command,
        AuthRequest::Domain { .. } => LearnedKind::Domain,
        AuthRequest::Sandbox { .. } | AuthRequest::FileWrite { .. } => LearnedKind::Exact,
    }
}

/// Fallback pattern when neither judge nor user supplied one: approve
/// exactly this invocation.
fn default_pattern(req: &AuthRequest) -> String {
    match req {
        AuthRequest::Command { command } => command.clone(),
        AuthRequest::Domain { domain } => domain.clone(),
        AuthRequest::Sandbox { .. } | AuthRequest::FileWrite { .. } => req.fingerprint(),
    }
}

fn describe(req: &AuthRequest) -> String {
    match req {
        AuthRequest::Command { command } => format!("run shell command: {command}"),
        AuthRequest::Domain { domain } => format!("connect to domain: {domain}"),
        AuthRequest::Sandbox { fingerprint } => format!("sandboxed execution: {fingerprint}"),
        AuthRequest::FileWrite { path } => format!("write file: {}", path.display()),
    }
}

async fn ask_judge(
    judge: &dyn ModelProvider,
    req: &AuthRequest,
) -> anyhow::Result<(bool, Option<String>)> {
    let request = CompletionRequest {
        system: Some(JUDGE_SYSTEM_PROMPT.to_string()),
        messages: vec![Message::user(describe(req))],
        tools: vec![],
    };
    let response = tokio::time::timeout(JUDGE_TIMEOUT, judge.complete(request))
        .await
        .map_err(|_| anyhow::anyhow!("judge timed out"))??;
    parse_judge_safety(&response.content)
        .ok_or_else(|| anyhow::anyhow!("unparseable judge reply: {}", response.content))
}

/// Extract `{"safe": bool, "prefix": "..."}` from a judge reply that may
/// wrap the JSON in prose.
fn parse_judge_safety(raw: &str) -> Option<(bool, Option<String>)> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let body: serde_json::Value = serde_json::from_str(&raw[start..=end]).ok()?;
    let safe = body.get("safe")?.as_bool()?;
    let prefix = body
        .get("prefix")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Some((safe, prefix))
}

/// Clone-able client implementing the tools-facing [`Authorizer`] contract.
#[derive(Clone)]
pub struct AuthorizationClient {
    actor: ActorRef<AuthMsg>,
}

impl AuthorizationClient {
    pub fn actor(&self) -> &ActorRef<AuthMsg> {
        &self.actor
    }

    pub async fn stop(&self, deadline: Duration) {
        let _ = self.actor.stop(deadline).await;
    }
}

#[async_trait]
impl Authorizer for AuthorizationClient {
    async fn authorize(&self, req: AuthRequest) -> AuthDecision {
        let (reply, rx) = oneshot::channel();
        if self.actor.send(AuthMsg::Request { req, reply }).is_err() {
            return AuthDecision::Denied {
                reason: "authorization actor unavailable".into(),
            };
        }
        rx.await.unwrap_or(AuthDecision::Denied {
            reason: "authorization actor dropped the request".into(),
        })
    }
}

/// Spawn the authorization actor and return its client.
pub fn spawn_authorization(setup: AuthorizationSetup) -> AuthorizationClient {
    let actor = skald_actor::spawn(
        "authorization",
        AuthorizationActor::new(setup),
        64,
        SpawnOptions::default(),
    );
    AuthorizationClient { actor }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
