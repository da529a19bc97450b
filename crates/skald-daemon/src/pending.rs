// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Pending-request tables for the two user round-trips the broker drives:
//! authorizations (two phases: ack, then response) and questions (one
//! tagged answer union).  Entries are created by whoever needs the answer,
//! resolved by the inbound reply, and removed on reply, timeout, or
//! cancellation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

/// The frontend must show the authorization dialog within this window.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);
/// The user must answer the authorization dialog within this window.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// The user must answer a question within this window.
pub const QUESTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Phase-2 authorization verdict from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub approved: bool,
    pub prefix: Option<String>,
    pub scope: Option<String>,
}

struct AuthEntry {
    ack: Option<oneshot::Sender<()>>,
    response: Option<oneshot::Sender<AuthReply>>,
}

#[derive(Default)]
pub struct PendingAuthorizations {
    inner: Mutex<HashMap<String, AuthEntry>>,
}

impl PendingAuthorizations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry; the receivers resolve on ack and response.
    pub fn create(&self, id: &str) -> (oneshot::Receiver<()>, oneshot::Receiver<AuthReply>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (resp_tx, resp_rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(
            id.to_string(),
            AuthEntry {
                ack: Some(ack_tx),
                response: Some(resp_tx),
            },
        );
        (ack_rx, resp_rx)
    }

    /// Phase 1 arrived.  False for unknown/duplicate acks.
    pub fn ack(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner
            .get_mut(id)
            .and_then(|e| e.ack.take())
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    /// Phase 2 arrived.  The entry is consumed.
    pub fn respond(&self, id: &str, reply: AuthReply) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut entry) = inner.remove(id) else {
            return false;
        };
        entry
            .response
            .take()
            .map(|tx| tx.send(reply).is_ok())
            .unwrap_or(false)
    }

    /// Drop an entry (timeout or cancellation).  Receivers resolve with
    /// channel-closed errors, which callers treat as deny.
    pub fn remove(&self, id: &str) {
        self.inner.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answer to a question request — one union for both single and
/// multi-answer shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionReply {
    pub answer: Option<String>,
    pub answers: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Default)]
pub struct PendingQuestions {
    inner: Mutex<HashMap<String, oneshot::Sender<QuestionReply>>>,
}

impl PendingQuestions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: &str) -> oneshot::Receiver<QuestionReply> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    pub fn respond(&self, id: &str, reply: QuestionReply) -> bool {
        self.inner
            .lock()
            .unwrap()
            .remove(id)
            .map(|tx| tx.send(reply).is_ok())
            .unwrap_or(false)
    }

    pub fn remove(&self, id: &str) {
        self.inner.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
