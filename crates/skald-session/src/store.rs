// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! On-disk session storage behind an actor, so that all reads and writes
//! for a workspace are serialized through one mailbox.
//!
//! Layout: one directory per workspace under the store root, named by the
//! SHA-256 of the absolute workspace path (filesystem-safe regardless of
//! what characters the path contains), holding one `{session_id}.json` per
//! session.  Writes go to a temporary sibling first and are renamed into
//! place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::debug;

use skald_actor::{Actor, ActorContext, ActorRef, SpawnOptions};

use crate::session::SessionSnapshot;

/// Listing entry for a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Messages understood by the store actor.
pub enum StoreMsg {
    Save {
        workspace: PathBuf,
        snapshot: SessionSnapshot,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    Load {
        workspace: PathBuf,
        session_id: String,
        reply: oneshot::Sender<anyhow::Result<SessionSnapshot>>,
    },
    List {
        workspace: PathBuf,
        reply: oneshot::Sender<anyhow::Result<Vec<SessionMeta>>>,
    },
    Delete {
        workspace: PathBuf,
        session_id: String,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
}

/// The actor serializing all session file I/O.
pub struct SessionStoreActor {
    root: PathBuf,
}

impl SessionStoreActor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workspace_dir(&self, workspace: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(workspace.to_string_lossy().as_bytes());
        self.root.join(hex::encode(hasher.finalize()))
    }

    fn save(&self, workspace: &Path, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let dir = self.workspace_dir(workspace);
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("{}.json", snapshot.id));
        let tmp = dir.join(format!("{}.json.tmp", snapshot.id));
        let text = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        debug!(session = %snapshot.id, path = %path.display(), "session saved");
        Ok(())
    }

    fn load(&self, workspace: &Path, session_id: &str) -> anyhow::Result<SessionSnapshot> {
        let path = self.workspace_dir(workspace).join(format!("{session_id}.json"));
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn list(&self, workspace: &Path) -> anyhow::Result<Vec<SessionMeta>> {
        let dir = self.workspace_dir(workspace);
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(snap) = serde_json::from_str::<SessionSnapshot>(&text) else {
                continue;
            };
            out.push(SessionMeta {
                id: snap.id,
                title: snap.title,
                updated_at: snap.updated_at,
                message_count: snap.messages.len(),
            });
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    fn delete(&self, workspace: &Path, session_id: &str) -> anyhow::Result<()> {
        let path = self.workspace_dir(workspace).join(format!("{session_id}.json"));
        std::fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))
    }
}

#[async_trait]
impl Actor for SessionStoreActor {
    type Msg = StoreMsg;

    async fn receive(&mut self, _ctx: &ActorContext<StoreMsg>, msg: StoreMsg) -> anyhow::Result<()> {
        match msg {
            StoreMsg::Save {
                workspace,
                snapshot,
                reply,
            } => {
                let _ = reply.send(self.save(&workspace, &snapshot));
            }
            StoreMsg::Load {
                workspace,
                session_id,
                reply,
            } => {
                let _ = reply.send(self.load(&workspace, &session_id));
            }
            StoreMsg::List { workspace, reply } => {
                let _ = reply.send(self.list(&workspace));
            }
            StoreMsg::Delete {
                workspace,
                session_id,
                reply,
            } => {
                let _ = reply.send(self.delete(&workspace, &session_id));
            }
        }
        Ok(())
    }

    fn on_undelivered(&mut self, msg: StoreMsg) {
        let cancelled = || anyhow::anyhow!("cancelled: session store stopped");
        match msg {
            StoreMsg::Save { reply, .. } => {
                let _ = reply.send(Err(cancelled()));
            }
            StoreMsg::Load { reply, .. } => {
                let _ = reply.send(Err(cancelled()));
            }
            StoreMsg::List { reply, .. } => {
                let _ = reply.send(Err(cancelled()));
            }
            StoreMsg::Delete { reply, .. } => {
                let _ = reply.send(Err(cancelled()));
            }
        }
    }
}

/// Cheap clone-able client for the store actor.
#[derive(Clone)]
pub struct SessionStore {
    actor: ActorRef<StoreMsg>,
}

impl SessionStore {
    /// Spawn the store actor over `root` and return a client.
    pub fn spawn(root: impl Into<PathBuf>) -> Self {
        let actor = skald_actor::spawn(
            "session-store",
            SessionStoreActor::new(root),
            64,
            SpawnOptions::default(),
        );
        Self { actor }
    }

    pub fn actor(&self) -> &ActorRef<StoreMsg> {
        &self.actor
    }

    pub async fn save(&self, workspace: PathBuf, snapshot: SessionSnapshot) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.actor
            .send(StoreMsg::Save {
                workspace,
                snapshot,
                reply,
            })
            .map_err(|e| anyhow::anyhow!("session store unavailable: {e}"))?;
        rx.await.context("session store dropped the request")?
    }

    pub async fn load(
        &self,
        workspace: PathBuf,
        session_id: String,
    ) -> anyhow::Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.actor
            .send(StoreMsg::Load {
                workspace,
                session_id,
                reply,
            })
            .map_err(|e| anyhow::anyhow!("session store unavailable: {e}"))?;
        rx.await.context("session store dropped the request")?
    }

    pub async fn list(&self, workspace: PathBuf) -> anyhow::Result<Vec<SessionMeta>> {
        let (reply, rx) = oneshot::channel();
        self.actor
            .send(StoreMsg::List { workspace, reply })
            .map_err(|e| anyhow::anyhow!("session store unavailable: {e}"))?;
        rx.await.context("session store dropped the request")?
    }

    pub async fn delete(&self, workspace: PathBuf, session_id: String) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.actor
            .send(StoreMsg::Delete {
                workspace,
                session_id,
                reply,
            })
            .map_err(|e| anyhow::anyhow!("session store unavailable: {e}"))?;
        rx.await.context("session store dropped the request")?
    }

    pub async fn stop(&self, deadline: Duration) {
        let _ = self.actor.stop(deadline).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
