// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Daemon-side session/workspace management.
//!
//! The daemon owns every live session.  Each session gets its own guard
//! actors (interactions routed to the owning client over the socket,
//! authorization with the per-workspace approval store); the system-wide
//! singletons (session store, domain blocker, health supervisor) are
//! shared.  Clients come and go; sessions are destroyed only by explicit
//! delete.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use skald_actor::{ActorRef, Supervisor};
use skald_config::Config;
use skald_core::{AgentServices, Orchestrator, Planner, ProgressEvent};
use skald_guard::{
    spawn_authorization, spawn_domain_blocker, spawn_interactions, AuthorizationClient,
    AuthorizationSetup, BlocklistHandle, BlocklistMsg, InteractionHandler, InteractionKind,
    InteractionRequest, InteractionResponse, Interactions,
};
use skald_model::{from_config, ModelProvider};
use skald_session::{
    spawn_autosave, ActiveSessions, Session, SessionStore, Workspace, WorkspaceManager,
};
use skald_tools::{builtin, Dispatcher, ShellControls, ToolContext, ToolRegistry};

use crate::hub::Hub;
use crate::pending::{
    PendingAuthorizations, PendingQuestions, ACK_TIMEOUT, QUESTION_TIMEOUT, RESPONSE_TIMEOUT,
};
use crate::protocol::{Envelope, ServerPayload, SessionSummary, WorkspaceSummary};

/// Deadline for actor drains at session close and daemon shutdown.
const STOP_DEADLINE: Duration = Duration::from_secs(5);

struct SessionRuntime {
    session: Arc<Mutex<Session>>,
    working_dir: PathBuf,
    interactions: Interactions,
    authorizer: AuthorizationClient,
    /// Cancel handle of the in-flight turn, if one is running.
    cancel: Option<oneshot::Sender<()>>,
}

pub struct DaemonState {
    config: Arc<Config>,
    state_dir: PathBuf,
    pub hub: Hub,
    pub store: SessionStore,
    pub sessions: ActiveSessions,
    pub pending_auth: Arc<PendingAuthorizations>,
    pub pending_questions: Arc<PendingQuestions>,
    pub blocklist: BlocklistHandle,
    blocklist_actor: ActorRef<BlocklistMsg>,
    pub shell_controls: ShellControls,
    registry: Arc<ToolRegistry>,
    model: Arc<dyn ModelProvider>,
    judge: Option<Arc<dyn ModelProvider>>,
    runtimes: RwLock<HashMap<String, SessionRuntime>>,
    workspaces: Mutex<WorkspaceManager>,
    pub supervisor: Arc<Supervisor>,
    autosave: tokio::task::JoinHandle<()>,
}

impl DaemonState {
    pub async fn new(config: Arc<Config>) -> anyhow::Result<Arc<Self>> {
        let state_dir = config
            .daemon
            .state_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("skald")))
            .context("no usable state directory")?;
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating {}", state_dir.display()))?;

        let model = from_config(&config.model).context("constructing model provider")?;
        let judge = match &config.judge_model {
            Some(cfg) => Some(from_config(cfg).context("constructing judge provider")?),
            None => None,
        };

        let mut registry = ToolRegistry::new();
        let shell_controls = builtin::register_standard_tools(
            &mut registry,
            Duration::from_secs(config.agent.shell_timeout_secs),
        );

        let store = SessionStore::spawn(state_dir.join("sessions"));
        let sessions = ActiveSessions::new();
        let (blocklist, blocklist_actor) =
            spawn_domain_blocker(config.blocklist.clone(), state_dir.join("blocklist"));

        let supervisor = Supervisor::new(Duration::from_secs(30));
        supervisor.register(Arc::new(store.actor().clone()));
        supervisor.register(Arc::new(blocklist_actor.clone()));
        let _health_poller = supervisor.spawn_polling();

        let autosave = spawn_autosave(
            sessions.clone(),
            store.clone(),
            Duration::from_secs(config.daemon.auto_save_secs.max(1)),
        );

        Ok(Arc::new(Self {
            config,
            state_dir,
            hub: Hub::new(),
            store,
            sessions,
            pending_auth: Arc::new(PendingAuthorizations::new()),
            pending_questions: Arc::new(PendingQuestions::new()),
            blocklist,
            blocklist_actor,
            shell_controls,
            registry: Arc::new(registry),
            model,
            judge,
            runtimes: RwLock::new(HashMap::new()),
            workspaces: Mutex::new(WorkspaceManager::new()),
            supervisor,
            autosave,
        }))
    }

    fn workspace_config_dir(&self, working_dir: &PathBuf) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(working_dir.to_string_lossy().as_bytes());
        self.state_dir
            .join("workspaces")
            .join(hex::encode(hasher.finalize()))
    }

    /// Guard actors for one session, wired to the owning client's socket.
    fn spawn_session_guards(
        self: &Arc<Self>,
        session_id: &str,
        working_dir: &PathBuf,
    ) -> (Interactions, AuthorizationClient) {
        let interactions = spawn_interactions(Arc::new(SocketInteractionHandler {
            session_id: session_id.to_string(),
            hub: self.hub.clone(),
            auth: Arc::clone(&self.pending_auth),
            questions: Arc::clone(&self.pending_questions),
        }));
        let workspace_dir = self.workspace_config_dir(working_dir);
        let workspace = skald_config::WorkspaceConfig::load(&workspace_dir).unwrap_or_default();
        let authorizer = spawn_authorization(AuthorizationSetup {
            workspace_dir,
            workspace,
            cli_commands: self.config.agent.pre_authorized_commands.clone(),
            cli_domains: self.config.agent.pre_authorized_domains.clone(),
            judge: self.judge.clone(),
            interactions: Some(interactions.clone()),
        });
        self.supervisor.register(Arc::new(interactions.actor().clone()));
        self.supervisor.register(Arc::new(authorizer.actor().clone()));
        (interactions, authorizer)
    }

    async fn install_session(
        self: &Arc<Self>,
        session: Session,
        client: Uuid,
    ) -> anyhow::Result<String> {
        let session_id = session.id.clone();
        let working_dir = session.working_dir.clone();
        let handle = self.sessions.insert(session).await;
        let (interactions, authorizer) = self.spawn_session_guards(&session_id, &working_dir);
        self.runtimes.write().await.insert(
            session_id.clone(),
            SessionRuntime {
                session: handle,
                working_dir: working_dir.clone(),
                interactions,
                authorizer,
                cancel: None,
            },
        );
        self.hub
            .claim(&session_id, client)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        self.workspaces.lock().await.add_session(&working_dir);
        info!(session = %session_id, dir = %working_dir.display(), "session installed");
        Ok(session_id)
    }

    pub async fn create_session(
        self: &Arc<Self>,
        client: Uuid,
        working_dir: Option<String>,
    ) -> anyhow::Result<(String, PathBuf)> {
        let wd = match working_dir {
            Some(w) => PathBuf::from(w),
            None => std::env::current_dir().context("resolving current directory")?,
        };
        let session = Session::new(&wd);
        let id = self.install_session(session, client).await?;
        Ok((id, wd))
    }

    pub async fn attach_session(&self, client: Uuid, session_id: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.runtimes.read().await.contains_key(session_id),
            "unknown session: {session_id}"
        );
        self.hub
            .claim(session_id, client)
            .map_err(|_| anyhow::anyhow!("session is owned by another client"))?;
        Ok(())
    }

    pub async fn detach(&self, client: Uuid, session_id: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.hub.release(session_id, client),
            "client does not own session {session_id}"
        );
        Ok(())
    }

    fn require_owner(&self, client: Uuid, session_id: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.hub.owner(session_id) == Some(client),
            "client does not own session {session_id}"
        );
        Ok(())
    }

    /// Start one chat turn.  The turn runs on its own task; progress is
    /// streamed to the owning client as it happens.
    pub async fn send_chat(
        self: &Arc<Self>,
        client: Uuid,
        session_id: &str,
        content: String,
    ) -> anyhow::Result<()> {
        self.require_owner(client, session_id)?;
        let (session, working_dir, authorizer, interactions, mut cancel_rx) = {
            let mut runtimes = self.runtimes.write().await;
            let runtime = runtimes
                .get_mut(session_id)
                .with_context(|| format!("unknown session: {session_id}"))?;
            anyhow::ensure!(runtime.cancel.is_none(), "a chat turn is already running");
            let (cancel_tx, cancel_rx) = oneshot::channel();
            runtime.cancel = Some(cancel_tx);
            (
                Arc::clone(&runtime.session),
                runtime.working_dir.clone(),
                runtime.authorizer.clone(),
                runtime.interactions.clone(),
                cancel_rx,
            )
        };

        let (progress_tx, progress_rx) = mpsc::channel::<ProgressEvent>(256);
        self.spawn_progress_forwarder(session_id.to_string(), progress_rx);
        let progress_for_plan = progress_tx.clone();

        let services = AgentServices {
            model: Arc::clone(&self.model),
            judge: self.judge.clone(),
            dispatcher: Dispatcher::new(
                Arc::clone(&self.registry),
                self.config.agent.tool_parallelism,
            ),
            progress: progress_tx,
        };
        let ctx = ToolContext {
            working_dir: working_dir.clone(),
            session,
            authorizer: Arc::new(authorizer),
            domains: Arc::new(self.blocklist.clone()),
        };
        let mut orchestrator = Orchestrator::new(
            services,
            self.config.agent.clone(),
            system_prompt(&working_dir),
        );

        let state = Arc::clone(self);
        let session_id = session_id.to_string();
        let planning = self.config.agent.planning_enabled;
        let model = Arc::clone(&self.model);
        let judge = self.judge.clone();
        tokio::spawn(async move {
            let prompt = if planning {
                let planner = Planner::new(Arc::clone(&model), Some(interactions));
                match planner.plan(&content).await {
                    Ok(Some(plan)) => {
                        let _ = progress_for_plan
                            .send(ProgressEvent::PlanReady { plan: plan.clone() })
                            .await;
                        format!("{content}\n\nPlan:\n{plan}")
                    }
                    _ => content,
                }
            } else {
                content
            };

            let result = orchestrator.run_prompt(&ctx, &prompt, &mut cancel_rx).await;
            debug!(session = %session_id, reason = %result.reason, "chat turn finished");
            if let Some(runtime) = state.runtimes.write().await.get_mut(&session_id) {
                runtime.cancel = None;
                let mut session = runtime.session.lock().await;
                if session.title().is_none() {
                    if let Some(title) = summarize_title(judge.as_deref(), &session).await {
                        session.set_title(title);
                    } else {
                        session.ensure_title();
                    }
                }
            }
        });
        Ok(())
    }

    fn spawn_progress_forwarder(
        self: &Arc<Self>,
        session_id: String,
        mut progress_rx: mpsc::Receiver<ProgressEvent>,
    ) {
        let hub = self.hub.clone();
        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let payload = match event {
                    ProgressEvent::AssistantMessage { content, .. } => {
                        ServerPayload::ChatMessage {
                            session_id: session_id.clone(),
                            role: "assistant".into(),
                            content,
                        }
                    }
                    ProgressEvent::ToolCallStarted {
                        call_id,
                        tool_name,
                        args,
                    } => ServerPayload::ToolCall {
                        session_id: session_id.clone(),
                        call_id,
                        tool_name,
                        args,
                    },
                    ProgressEvent::ToolCallFinished {
                        call_id,
                        output,
                        is_error,
                        ..
                    } => ServerPayload::ToolResult {
                        session_id: session_id.clone(),
                        call_id,
                        output,
                        is_error,
                    },
                    other => ServerPayload::Progress {
                        session_id: session_id.clone(),
                        kind: progress_kind(&other).to_string(),
                        detail: progress_detail(&other),
                    },
                };
                hub.send_to_owner(&session_id, &Envelope::fresh(payload));
            }
        });
    }

    pub async fn stop_chat(&self, client: Uuid, session_id: &str) -> anyhow::Result<()> {
        self.require_owner(client, session_id)?;
        let cancel = self
            .runtimes
            .write()
            .await
            .get_mut(session_id)
            .and_then(|r| r.cancel.take());
        match cancel {
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => anyhow::bail!("no chat turn is running"),
        }
    }

    pub async fn clear_chat(&self, client: Uuid, session_id: &str) -> anyhow::Result<()> {
        self.require_owner(client, session_id)?;
        let runtimes = self.runtimes.read().await;
        let runtime = runtimes
            .get(session_id)
            .with_context(|| format!("unknown session: {session_id}"))?;
        runtime.session.lock().await.replace_messages(Vec::new());
        Ok(())
    }

    pub async fn background_shell(
        &self,
        client: Uuid,
        session_id: &str,
        call_id: &str,
    ) -> anyhow::Result<bool> {
        self.require_owner(client, session_id)?;
        Ok(self.shell_controls.background(call_id).await)
    }

    pub async fn save_session(&self, client: Uuid, session_id: &str) -> anyhow::Result<()> {
        self.require_owner(client, session_id)?;
        let handle = self
            .sessions
            .get(session_id)
            .await
            .with_context(|| format!("unknown session: {session_id}"))?;
        let (snapshot, as_of) = {
            let session = handle.lock().await;
            anyhow::ensure!(
                session.can_resume(),
                "session has pending tool calls; wait for the turn to finish"
            );
            (session.snapshot(), session.updated_at)
        };
        let workspace = snapshot.working_dir.clone();
        self.store.save(workspace, snapshot).await?;
        handle.lock().await.mark_saved(as_of);
        Ok(())
    }

    pub async fn load_session(
        self: &Arc<Self>,
        client: Uuid,
        session_id: &str,
        working_dir: Option<String>,
    ) -> anyhow::Result<usize> {
        let wd = match working_dir {
            Some(w) => PathBuf::from(w),
            None => std::env::current_dir()?,
        };
        let snapshot = self.store.load(wd, session_id.to_string()).await?;
        let session = Session::from_snapshot(snapshot);
        anyhow::ensure!(
            session.can_resume(),
            "session {session_id} ends in pending tool calls and cannot be resumed"
        );
        let count = session.messages().len();
        self.install_session(session, client).await?;
        Ok(count)
    }

    pub async fn delete_session(
        self: &Arc<Self>,
        client: Uuid,
        session_id: &str,
        working_dir: Option<String>,
    ) -> anyhow::Result<()> {
        let wd = match working_dir {
            Some(w) => PathBuf::from(w),
            None => match self.runtimes.read().await.get(session_id) {
                Some(r) => r.working_dir.clone(),
                None => std::env::current_dir()?,
            },
        };
        // Explicit delete is the only way a session dies.
        if self.sessions.remove(session_id).await.is_some() {
            if let Some(runtime) = self.runtimes.write().await.remove(session_id) {
                runtime.interactions.stop(STOP_DEADLINE).await;
                runtime.authorizer.stop(STOP_DEADLINE).await;
                self.workspaces
                    .lock()
                    .await
                    .remove_session(&runtime.working_dir);
            }
            self.hub.release(session_id, client);
        }
        // Remove the persisted copy too, when one exists.
        if let Err(e) = self.store.delete(wd, session_id.to_string()).await {
            debug!("no persisted copy to delete: {e}");
        }
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        working_dir: Option<String>,
    ) -> anyhow::Result<Vec<SessionSummary>> {
        let wd = match working_dir {
            Some(w) => PathBuf::from(w),
            None => std::env::current_dir()?,
        };
        let mut summaries: Vec<SessionSummary> = self
            .store
            .list(wd.clone())
            .await?
            .into_iter()
            .map(|m| SessionSummary {
                id: m.id,
                title: m.title,
                updated_at: m.updated_at.to_rfc3339(),
                message_count: m.message_count,
            })
            .collect();
        // Live sessions for the workspace that were never saved yet.
        for id in self.sessions.ids().await {
            if summaries.iter().any(|s| s.id == id) {
                continue;
            }
            if let Some(handle) = self.sessions.get(&id).await {
                let session = handle.lock().await;
                if session.working_dir == wd {
                    summaries.push(SessionSummary {
                        id: session.id.clone(),
                        title: session.title().map(str::to_string),
                        updated_at: session.updated_at.to_rfc3339(),
                        message_count: session.messages().len(),
                    });
                }
            }
        }
        Ok(summaries)
    }

    pub async fn list_workspaces(&self) -> Vec<WorkspaceSummary> {
        self.workspaces
            .lock()
            .await
            .list()
            .into_iter()
            .map(|w: Workspace| WorkspaceSummary {
                path: w.root.display().to_string(),
                branch: w.branch,
                session_count: w.session_count,
            })
            .collect()
    }

    pub async fn set_workspace(&self, path: &str) -> anyhow::Result<()> {
        let path = PathBuf::from(path);
        anyhow::ensure!(path.is_dir(), "not a directory: {}", path.display());
        self.workspaces.lock().await.workspace(&path);
        Ok(())
    }

    /// Graceful drain: persist dirty sessions, stop every actor, clean up
    /// worktrees.
    pub async fn shutdown(&self) {
        info!("daemon draining");
        self.autosave.abort();
        let saved = self.sessions.save_dirty(&self.store).await;
        if saved > 0 {
            info!(saved, "sessions saved on shutdown");
        }
        for (_, runtime) in self.runtimes.write().await.drain() {
            if let Some(cancel) = runtime.cancel {
                let _ = cancel.send(());
            }
            runtime.interactions.stop(STOP_DEADLINE).await;
            runtime.authorizer.stop(STOP_DEADLINE).await;
        }
        let _ = self.blocklist_actor.stop(STOP_DEADLINE).await;
        self.store.stop(STOP_DEADLINE).await;
        self.workspaces.lock().await.cleanup_worktrees().await;
    }
}

/// Ask the judge model for a short session title from the first exchange.
async fn summarize_title(
    judge: Option<&dyn ModelProvider>,
    session: &Session,
) -> Option<String> {
    let judge = judge?;
    let first = session
        .messages()
        .iter()
        .find(|m| m.role == skald_model::Role::User)?;
    let request = skald_model::CompletionRequest {
        system: Some(
            "Produce a short title (at most eight words) for this coding task. \
             Reply with the title only."
                .to_string(),
        ),
        messages: vec![skald_model::Message::user(first.content.clone())],
        tools: vec![],
    };
    let response = tokio::time::timeout(Duration::from_secs(10), judge.complete(request))
        .await
        .ok()?
        .ok()?;
    let title: String = response.content.trim().trim_matches('"').chars().take(80).collect();
    (!title.is_empty()).then_some(title)
}

fn system_prompt(working_dir: &PathBuf) -> String {
    format!(
        "You are skald, an AI coding agent working in {}.\n\
         Use the available tools to inspect and modify the project. Read a file \
         before editing it. Prefer small, verifiable steps, and report what you \
         did when you finish.",
        working_dir.display()
    )
}

fn progress_kind(event: &ProgressEvent) -> &'static str {
    match event {
        ProgressEvent::AssistantMessage { .. } => "assistant_message",
        ProgressEvent::ToolCallStarted { .. } => "tool_call",
        ProgressEvent::ToolCallFinished { .. } => "tool_result",
        ProgressEvent::AutoContinue { .. } => "auto_continue",
        ProgressEvent::ContextCompacted { .. } => "context_compacted",
        ProgressEvent::PlanReady { .. } => "plan_ready",
        ProgressEvent::Terminated { .. } => "terminated",
        ProgressEvent::Error(_) => "error",
    }
}

fn progress_detail(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::AutoContinue { count } => serde_json::json!({ "count": count }),
        ProgressEvent::ContextCompacted {
            tokens_before,
            tokens_after,
            iteration,
        } => serde_json::json!({
            "tokens_before": tokens_before,
            "tokens_after": tokens_after,
            "iteration": iteration,
        }),
        ProgressEvent::PlanReady { plan } => serde_json::json!({ "plan": plan }),
        ProgressEvent::Terminated { reason } => serde_json::json!({
            "reason": reason.to_string(),
            "pattern": match reason {
                skald_core::TerminationReason::LoopDetected { pattern } => {
                    Some(pattern.clone())
                }
                _ => None,
            },
        }),
        ProgressEvent::Error(message) => serde_json::json!({ "message": message }),
        _ => serde_json::Value::Null,
    }
}

// ─── Socket-backed interaction handler ───────────────────────────────────────

/// Satisfies interaction requests by round-tripping them to the session's
/// owning client over the framed socket, via the pending-request tables.
struct SocketInteractionHandler {
    session_id: String,
    hub: Hub,
    auth: Arc<PendingAuthorizations>,
    questions: Arc<PendingQuestions>,
}

#[async_trait]
impl InteractionHandler for SocketInteractionHandler {
    async fn handle(&self, req: &InteractionRequest) -> anyhow::Result<InteractionResponse> {
        match req.kind {
            InteractionKind::Authorization => self.handle_authorization(req).await,
            _ => self.handle_question(req).await,
        }
    }
}

impl SocketInteractionHandler {
    async fn handle_authorization(
        &self,
        req: &InteractionRequest,
    ) -> anyhow::Result<InteractionResponse> {
        let id = req.id.clone();
        let (ack_rx, resp_rx) = self.auth.create(&id);
        let env = Envelope::fresh(ServerPayload::AuthorizationRequest {
            id: id.clone(),
            description: req.payload["description"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            fingerprint: req.payload["fingerprint"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            suggested_prefix: req.payload["suggested_prefix"]
                .as_str()
                .map(str::to_string),
        });
        if !self.hub.send_to_owner(&self.session_id, &env) {
            self.auth.remove(&id);
            let mut resp = InteractionResponse::approved(false);
            resp.acknowledged = false;
            resp.error = Some("no attached client".into());
            return Ok(resp);
        }

        // Phase 1: the dialog must appear within 30 s.
        match tokio::time::timeout(ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => {}
            _ => {
                self.auth.remove(&id);
                warn!(id = %id, "authorization dialog was never displayed");
                let mut resp = InteractionResponse::approved(false);
                resp.acknowledged = false;
                resp.error = Some("dialog not displayed".into());
                return Ok(resp);
            }
        }

        // Phase 2: the verdict.
        match tokio::time::timeout(RESPONSE_TIMEOUT, resp_rx).await {
            Ok(Ok(reply)) => {
                let mut resp = InteractionResponse::approved(reply.approved);
                let mut answers = std::collections::BTreeMap::new();
                if let Some(prefix) = reply.prefix {
                    answers.insert("prefix".to_string(), prefix);
                }
                if let Some(scope) = reply.scope {
                    answers.insert("scope".to_string(), scope);
                }
                if !answers.is_empty() {
                    resp.answers = Some(answers);
                }
                Ok(resp)
            }
            Ok(Err(_)) => Ok(InteractionResponse::cancelled()),
            Err(_) => {
                self.auth.remove(&id);
                Ok(InteractionResponse::timed_out())
            }
        }
    }

    async fn handle_question(
        &self,
        req: &InteractionRequest,
    ) -> anyhow::Result<InteractionResponse> {
        let id = req.id.clone();
        let rx = self.questions.create(&id);
        let questions: Vec<String> = match req.payload.get("question").and_then(|q| q.as_str()) {
            Some(q) => vec![q.to_string()],
            None => req
                .payload
                .get("questions")
                .and_then(|qs| qs.as_array())
                .map(|qs| {
                    qs.iter()
                        .filter_map(|q| q.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        };
        let kind = match req.kind {
            InteractionKind::PlanningQuestion => "planning_question",
            InteractionKind::MultiInput => "multi_input",
            _ => "single_input",
        };
        let env = Envelope::fresh(ServerPayload::QuestionRequest {
            id: id.clone(),
            kind: kind.to_string(),
            questions,
        });
        if !self.hub.send_to_owner(&self.session_id, &env) {
            self.questions.remove(&id);
            return Ok(InteractionResponse::cancelled());
        }
        match tokio::time::timeout(QUESTION_TIMEOUT, rx).await {
            Ok(Ok(reply)) => {
                let mut resp = InteractionResponse::default();
                resp.acknowledged = true;
                resp.answer = reply.answer;
                resp.answers = reply.answers;
                Ok(resp)
            }
            Ok(Err(_)) => Ok(InteractionResponse::cancelled()),
            Err(_) => {
                self.questions.remove(&id);
                Ok(InteractionResponse::timed_out())
            }
        }
    }
}

