// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::session::Session;
use crate::store::SessionStore;

/// The set of live sessions the daemon currently hosts.
///
/// Each session is behind a tokio mutex because the orchestrator holds it
/// across awaits during a turn; everyone else (auto-saver, status queries)
/// takes short snapshots.
#[derive(Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session) -> Arc<Mutex<Session>> {
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(session));
        self.inner.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.inner.write().await.remove(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    async fn handles(&self) -> Vec<Arc<Mutex<Session>>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Save every dirty session once.  Used by the ticker and by the
    /// shutdown drain.
    pub async fn save_dirty(&self, store: &SessionStore) -> usize {
        let mut saved = 0;
        for handle in self.handles().await {
            // Snapshot under the lock, write without it.  A log ending in an
            // assistant message with pending tool calls is never persisted:
            // the results land moments later and the next sweep catches it.
            let (snapshot, as_of) = {
                let session = handle.lock().await;
                if !session.is_dirty() || !session.can_resume() {
                    continue;
                }
                (session.snapshot(), session.updated_at)
            };
            let workspace = snapshot.working_dir.clone();
            match store.save(workspace, snapshot).await {
                Ok(()) => {
                    handle.lock().await.mark_saved(as_of);
                    saved += 1;
                }
                Err(e) => warn!("auto-save failed: {e}"),
            }
        }
        saved
    }
}

/// Spawn the auto-save ticker.  Every `period` it sweeps the active
/// sessions and persists the dirty ones.
pub fn spawn_autosave(
    sessions: ActiveSessions,
    store: SessionStore,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh daemon does
        // not write before anything changed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let saved = sessions.save_dirty(&store).await;
            if saved > 0 {
                debug!(saved, "auto-save sweep");
            }
        }
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use skald_model::Message;

    use super::*;

    #[tokio::test]
    async fn save_dirty_persists_and_clears_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::spawn(dir.path());
        let sessions = ActiveSessions::new();

        let mut s = Session::new("/tmp/ws");
        s.push(Message::user("hello")).unwrap();
        let id = s.id.clone();
        let handle = sessions.insert(s).await;

        assert_eq!(sessions.save_dirty(&store).await, 1);
        assert!(!handle.lock().await.is_dirty());

        let back = store
            .load("/tmp/ws".into(), id)
            .await
            .unwrap();
        assert_eq!(back.messages.len(), 1);
    }

    #[tokio::test]
    async fn clean_sessions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::spawn(dir.path());
        let sessions = ActiveSessions::new();
        sessions.insert(Session::new("/tmp/ws")).await;
        assert_eq!(sessions.save_dirty(&store).await, 0);
    }

    #[tokio::test]
    async fn mutation_during_save_keeps_session_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::spawn(dir.path());
        let sessions = ActiveSessions::new();
        let mut s = Session::new("/tmp/ws");
        s.push(Message::user("a")).unwrap();
        let handle = sessions.insert(s).await;

        // Simulate a concurrent mutation between snapshot and mark_saved by
        // snapshotting manually, mutating, then marking with the stale stamp.
        let as_of = handle.lock().await.updated_at;
        handle.lock().await.push(Message::user("b")).unwrap();
        handle.lock().await.mark_saved(as_of);
        assert!(handle.lock().await.is_dirty());
        let _ = store;
    }

    #[tokio::test]
    async fn remove_returns_the_handle() {
        let sessions = ActiveSessions::new();
        let s = Session::new("/tmp/ws");
        let id = s.id.clone();
        sessions.insert(s).await;
        assert!(sessions.remove(&id).await.is_some());
        assert!(sessions.get(&id).await.is_none());
    }
}
