// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-connection client handler.
//!
//! Two tasks per connection: this reader (frames inbound messages and
//! dispatches them by type) and a writer draining the bounded send channel
//! the hub holds for the client.  A reader error closes only this client;
//! the sessions it owned are released, never destroyed.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::framing::read_raw_frame;
use crate::pending::{AuthReply, QuestionReply};
use crate::protocol::{ClientPayload, Envelope, ServerPayload};
use crate::state::DaemonState;

/// Frames queued per client before the slow-consumer policy drops.
const SEND_QUEUE: usize = 256;

/// Serve one connection until EOF or a protocol-fatal error.
pub(crate) async fn handle_connection<S>(stream: S, state: Arc<DaemonState>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let client_id = Uuid::new_v4();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(SEND_QUEUE);
    state.hub.register(client_id, tx);
    debug!(%client_id, "client connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    loop {
        let body = match read_raw_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                warn!(%client_id, "reader error: {e}");
                break;
            }
        };
        dispatch_frame(&state, client_id, &body).await;
    }

    state.hub.unregister(client_id);
    writer_task.abort();
    debug!(%client_id, "client disconnected");
}

/// Decode one frame and route it.  Malformed input gets an error envelope;
/// the connection stays open.
async fn dispatch_frame(state: &Arc<DaemonState>, client_id: Uuid, body: &[u8]) {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            let reply = Envelope::new(
                "",
                ServerPayload::error("bad_json", format!("malformed frame: {e}")),
            );
            state.hub.send_to(client_id, &reply);
            return;
        }
    };
    let request_id = value["request_id"].as_str().unwrap_or_default().to_string();
    let parsed: Result<Envelope<ClientPayload>, _> = serde_json::from_value(value);
    let payload = match parsed {
        Ok(env) => env.payload,
        Err(e) => {
            let reply = Envelope::new(
                request_id,
                ServerPayload::error("unknown_type", format!("unsupported message: {e}")),
            );
            state.hub.send_to(client_id, &reply);
            return;
        }
    };

    let reply = dispatch(state, client_id, payload).await;
    state.hub.send_to(client_id, &Envelope::new(request_id, reply));
}

async fn dispatch(
    state: &Arc<DaemonState>,
    client: Uuid,
    payload: ClientPayload,
) -> ServerPayload {
    match payload {
        ClientPayload::CreateSession { working_dir } => {
            match state.create_session(client, working_dir).await {
                Ok((session_id, wd)) => ServerPayload::SessionCreated {
                    session_id,
                    working_dir: wd.display().to_string(),
                },
                Err(e) => ServerPayload::error("create_failed", e.to_string()),
            }
        }
        ClientPayload::AttachSession { session_id } => {
            match state.attach_session(client, &session_id).await {
                Ok(()) => ServerPayload::Attached { session_id },
                Err(e) => ServerPayload::error("attach_failed", e.to_string()),
            }
        }
        ClientPayload::Detach { session_id } => match state.detach(client, &session_id).await {
            Ok(()) => ServerPayload::Detached { session_id },
            Err(e) => ServerPayload::error("detach_failed", e.to_string()),
        },
        ClientPayload::SendChat {
            session_id,
            content,
        } => match state.send_chat(client, &session_id, content).await {
            Ok(()) => ServerPayload::ChatAccepted { session_id },
            Err(e) => ServerPayload::error("chat_failed", e.to_string()),
        },
        ClientPayload::StopChat { session_id } => {
            match state.stop_chat(client, &session_id).await {
                Ok(()) => ServerPayload::ChatStopped { session_id },
                Err(e) => ServerPayload::error("stop_failed", e.to_string()),
            }
        }
        ClientPayload::ClearChat { session_id } => {
            match state.clear_chat(client, &session_id).await {
                Ok(()) => ServerPayload::ChatCleared { session_id },
                Err(e) => ServerPayload::error("clear_failed", e.to_string()),
            }
        }
        ClientPayload::SaveSession { session_id } => {
            match state.save_session(client, &session_id).await {
                Ok(()) => ServerPayload::SessionSaved { session_id },
                Err(e) => ServerPayload::error("save_failed", e.to_string()),
            }
        }
        ClientPayload::LoadSession {
            session_id,
            working_dir,
        } => match state.load_session(client, &session_id, working_dir).await {
            Ok(message_count) => ServerPayload::SessionLoaded {
                session_id,
                message_count,
            },
            Err(e) => ServerPayload::error("load_failed", e.to_string()),
        },
        ClientPayload::DeleteSession {
            session_id,
            working_dir,
        } => match state.delete_session(client, &session_id, working_dir).await {
            Ok(()) => ServerPayload::SessionDeleted { session_id },
            Err(e) => ServerPayload::error("delete_failed", e.to_string()),
        },
        ClientPayload::ListSessions { working_dir } => {
            match state.list_sessions(working_dir).await {
                Ok(sessions) => ServerPayload::SessionList { sessions },
                Err(e) => ServerPayload::error("list_failed", e.to_string()),
            }
        }
        ClientPayload::ListWorkspaces => ServerPayload::WorkspaceList {
            workspaces: state.list_workspaces().await,
        },
        ClientPayload::SetWorkspace { path } => match state.set_workspace(&path).await {
            Ok(()) => ServerPayload::WorkspaceSet { path },
            Err(e) => ServerPayload::error("workspace_failed", e.to_string()),
        },
        ClientPayload::BackgroundShell {
            session_id,
            call_id,
        } => match state.background_shell(client, &session_id, &call_id).await {
            Ok(ok) => ServerPayload::Backgrounded {
                session_id,
                call_id,
                ok,
            },
            Err(e) => ServerPayload::error("background_failed", e.to_string()),
        },
        ClientPayload::AuthorizationAck { id } => {
            if state.pending_auth.ack(&id) {
                ServerPayload::Progress {
                    session_id: String::new(),
                    kind: "authorization_acknowledged".into(),
                    detail: serde_json::json!({ "id": id }),
                }
            } else {
                ServerPayload::error("unknown_request", format!("no pending authorization {id}"))
            }
        }
        ClientPayload::AuthorizationResponse {
            id,
            approved,
            prefix,
            scope,
        } => {
            if state.pending_auth.respond(
                &id,
                AuthReply {
                    approved,
                    prefix,
                    scope,
                },
            ) {
                ServerPayload::Progress {
                    session_id: String::new(),
                    kind: "authorization_resolved".into(),
                    detail: serde_json::json!({ "id": id, "approved": approved }),
                }
            } else {
                ServerPayload::error("unknown_request", format!("no pending authorization {id}"))
            }
        }
        ClientPayload::QuestionResponse {
            id,
            answer,
            answers,
        } => {
            if state
                .pending_questions
                .respond(&id, QuestionReply { answer, answers })
            {
                ServerPayload::Progress {
                    session_id: String::new(),
                    kind: "question_resolved".into(),
                    detail: serde_json::json!({ "id": id }),
                }
            } else {
                ServerPayload::error("unknown_request", format!("no pending question {id}"))
            }
        }
    }
}
