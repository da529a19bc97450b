// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol between the daemon broker and attached frontends.
//!
//! Every frame carries `{type, request_id, data}`.  Request/response pairs
//! share a `request_id`; broker-initiated messages (chat stream, progress,
//! authorization/question round-trips) mint their own.
//!
//! ```text
//! Frontend                              Broker
//!    │── create_session ───────────────────►│  session_created
//!    │── send_chat {session_id, text} ─────►│  chat_accepted
//!    │◄─ chat_message / tool_call / … ───────│  (streamed)
//!    │◄─ authorization_request ──────────────│
//!    │── authorization_ack ────────────────►│  (within 30 s)
//!    │── authorization_response ───────────►│  (within 10 min)
//!    │◄─ progress {terminated} ──────────────│
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The outer frame: `request_id` plus the tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub request_id: String,
    #[serde(flatten)]
    pub payload: P,
}

impl<P> Envelope<P> {
    pub fn new(request_id: impl Into<String>, payload: P) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
        }
    }

    /// An envelope with a fresh broker-minted request id.
    pub fn fresh(payload: P) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), payload)
    }
}

/// Frontend → broker messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientPayload {
    CreateSession {
        working_dir: Option<String>,
    },
    AttachSession {
        session_id: String,
    },
    Detach {
        session_id: String,
    },
    SendChat {
        session_id: String,
        content: String,
    },
    StopChat {
        session_id: String,
    },
    ClearChat {
        session_id: String,
    },
    SaveSession {
        session_id: String,
    },
    LoadSession {
        session_id: String,
        working_dir: Option<String>,
    },
    DeleteSession {
        session_id: String,
        working_dir: Option<String>,
    },
    ListSessions {
        working_dir: Option<String>,
    },
    ListWorkspaces,
    SetWorkspace {
        path: String,
    },
    /// Move an in-flight shell tool call of this session to the background.
    BackgroundShell {
        session_id: String,
        call_id: String,
    },
    /// Phase 1 of an authorization round-trip: the dialog is on screen.
    AuthorizationAck {
        id: String,
    },
    /// Phase 2: the user's verdict.
    AuthorizationResponse {
        id: String,
        approved: bool,
        prefix: Option<String>,
        scope: Option<String>,
    },
    /// Answer to a `question_request`; single answer or a map, one union.
    QuestionResponse {
        id: String,
        answer: Option<String>,
        answers: Option<BTreeMap<String, String>>,
    },
}

/// Broker → frontend messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerPayload {
    SessionCreated {
        session_id: String,
        working_dir: String,
    },
    Attached {
        session_id: String,
    },
    Detached {
        session_id: String,
    },
    ChatAccepted {
        session_id: String,
    },
    ChatStopped {
        session_id: String,
    },
    ChatCleared {
        session_id: String,
    },
    SessionSaved {
        session_id: String,
    },
    SessionLoaded {
        session_id: String,
        message_count: usize,
    },
    SessionDeleted {
        session_id: String,
    },
    SessionList {
        sessions: Vec<SessionSummary>,
    },
    WorkspaceList {
        workspaces: Vec<WorkspaceSummary>,
    },
    WorkspaceSet {
        path: String,
    },
    Backgrounded {
        session_id: String,
        call_id: String,
        ok: bool,
    },

    // ── One-way stream ────────────────────────────────────────────────────────
    ChatMessage {
        session_id: String,
        role: String,
        content: String,
    },
    ToolCall {
        session_id: String,
        call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        session_id: String,
        call_id: String,
        output: String,
        is_error: bool,
    },
    Progress {
        session_id: String,
        kind: String,
        detail: serde_json::Value,
    },
    /// Expects `authorization_ack` within 30 s, then
    /// `authorization_response` within 10 min.
    AuthorizationRequest {
        id: String,
        description: String,
        fingerprint: String,
        suggested_prefix: Option<String>,
    },
    /// Expects `question_response` within 5 min.
    QuestionRequest {
        id: String,
        kind: String,
        questions: Vec<String>,
    },

    Error {
        code: String,
        message: String,
    },
}

impl ServerPayload {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
    pub updated_at: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub path: String,
    pub branch: Option<String>,
    pub session_count: usize,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_payload_round_trips() {
        let samples = vec![
            ClientPayload::CreateSession {
                working_dir: Some("/w".into()),
            },
            ClientPayload::AttachSession {
                session_id: "s".into(),
            },
            ClientPayload::StopChat {
                session_id: "s".into(),
            },
            ClientPayload::AuthorizationResponse {
                id: "a".into(),
                approved: true,
                prefix: Some("git status".into()),
                scope: Some("workspace".into()),
            },
            ClientPayload::QuestionResponse {
                id: "q".into(),
                answer: None,
                answers: Some([("q1".to_string(), "yes".to_string())].into_iter().collect()),
            },
        ];
        for payload in samples {
            let env = Envelope::new("r", payload);
            let text = serde_json::to_string(&env).unwrap();
            let back: Envelope<ClientPayload> = serde_json::from_str(&text).unwrap();
            assert_eq!(back, env);
        }
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let text = r#"{"request_id":"r","type":"frobnicate","data":{}}"#;
        assert!(serde_json::from_str::<Envelope<ClientPayload>>(text).is_err());
    }

    #[test]
    fn snake_case_tags_on_the_wire() {
        let env = Envelope::new(
            "r",
            ClientPayload::AuthorizationAck { id: "x".into() },
        );
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "authorization_ack");
        assert_eq!(v["data"]["id"], "x");
    }
}
