// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The hub: who is connected, and who owns which session.
//!
//! A session is owned by at most one attached client; a second client gets
//! an error until the owner detaches (or disconnects — disconnect releases
//! ownership but never destroys the session).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::framing::encode;
use crate::protocol::{Envelope, ServerPayload};

/// Per-client bounded FIFO of encoded frames; the writer task drains it,
/// which preserves per-client emission order.
pub type FrameSender = mpsc::Sender<Vec<u8>>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("session is owned by another client")]
    Owned,
}

#[derive(Default)]
struct HubInner {
    clients: HashMap<Uuid, FrameSender>,
    owners: HashMap<String, Uuid>,
}

#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: Uuid, tx: FrameSender) {
        self.inner.lock().unwrap().clients.insert(client, tx);
        debug!(%client, "client registered");
    }

    /// Remove a client and release every session it owned.
    pub fn unregister(&self, client: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        inner.clients.remove(&client);
        inner.owners.retain(|_, owner| *owner != client);
        debug!(%client, "client unregistered");
    }

    /// Claim exclusive ownership of a session.  Re-claiming one's own
    /// session is a no-op.
    pub fn claim(&self, session_id: &str, client: Uuid) -> Result<(), ClaimError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.owners.get(session_id) {
            Some(owner) if *owner != client => Err(ClaimError::Owned),
            _ => {
                inner.owners.insert(session_id.to_string(), client);
                Ok(())
            }
        }
    }

    /// Release ownership, if held by this client.
    pub fn release(&self, session_id: &str, client: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.owners.get(session_id) == Some(&client) {
            inner.owners.remove(session_id);
            true
        } else {
            false
        }
    }

    pub fn owner(&self, session_id: &str) -> Option<Uuid> {
        self.inner.lock().unwrap().owners.get(session_id).copied()
    }

    fn sender(&self, client: Uuid) -> Option<FrameSender> {
        self.inner.lock().unwrap().clients.get(&client).cloned()
    }

    /// Queue an envelope for one client.  A full send queue drops the
    /// frame (slow consumer) rather than stalling the daemon.
    pub fn send_to<P: Serialize>(&self, client: Uuid, env: &Envelope<P>) -> bool {
        let Some(tx) = self.sender(client) else {
            return false;
        };
        let Ok(frame) = encode(env) else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(%client, "dropping frame for slow client: {e}");
                false
            }
        }
    }

    /// Queue an envelope for the owner of a session.
    pub fn send_to_owner(&self, session_id: &str, env: &Envelope<ServerPayload>) -> bool {
        match self.owner(session_id) {
            Some(owner) => self.send_to(owner, env),
            None => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
