// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! End-to-end broker tests over a real Unix socket: ownership arbitration,
//! a full chat round-trip against the mock model, and protocol error
//! handling.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};

use skald_config::Config;
use skald_daemon::{
    decode, read_raw_frame, serve_unix_listener, write_frame, ClientPayload, DaemonState,
    Envelope, ServerPayload,
};

struct TestDaemon {
    socket: PathBuf,
    _state_dir: tempfile::TempDir,
}

async fn start_daemon() -> TestDaemon {
    let state_dir = tempfile::tempdir().unwrap();
    let socket = state_dir.path().join("daemon.sock");
    let config = Config {
        daemon: skald_config::DaemonConfig {
            state_dir: Some(state_dir.path().to_path_buf()),
            ..Default::default()
        },
        ..Default::default()
    };
    let state = DaemonState::new(Arc::new(config)).await.unwrap();
    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(serve_unix_listener(listener, state));
    TestDaemon {
        socket,
        _state_dir: state_dir,
    }
}

struct TestClient {
    stream: UnixStream,
}

impl TestClient {
    async fn connect(daemon: &TestDaemon) -> Self {
        Self {
            stream: UnixStream::connect(&daemon.socket).await.unwrap(),
        }
    }

    async fn send(&mut self, request_id: &str, payload: ClientPayload) {
        write_frame(&mut self.stream, &Envelope::new(request_id, payload))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Envelope<ServerPayload> {
        let body = tokio::time::timeout(
            Duration::from_secs(10),
            read_raw_frame(&mut self.stream),
        )
        .await
        .expect("reply within deadline")
        .unwrap()
        .expect("frame before EOF");
        decode(&body).unwrap()
    }

    /// Receive until a frame answering `request_id` arrives, skipping
    /// one-way stream messages.
    async fn recv_reply(&mut self, request_id: &str) -> ServerPayload {
        loop {
            let env = self.recv().await;
            if env.request_id == request_id {
                return env.payload;
            }
        }
    }

    async fn create_session(&mut self) -> String {
        self.send("create", ClientPayload::CreateSession { working_dir: Some("/tmp".into()) })
            .await;
        match self.recv_reply("create").await {
            ServerPayload::SessionCreated { session_id, .. } => session_id,
            other => panic!("expected session_created, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn ownership_is_exclusive_until_detach() {
    let daemon = start_daemon().await;
    let mut a = TestClient::connect(&daemon).await;
    let mut b = TestClient::connect(&daemon).await;

    let session_id = a.create_session().await;

    // B cannot attach while A owns the session.
    b.send(
        "attach-1",
        ClientPayload::AttachSession {
            session_id: session_id.clone(),
        },
    )
    .await;
    match b.recv_reply("attach-1").await {
        ServerPayload::Error { code, message } => {
            assert_eq!(code, "attach_failed");
            assert!(message.contains("owned"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    // After A detaches, B's retry succeeds.
    a.send(
        "detach",
        ClientPayload::Detach {
            session_id: session_id.clone(),
        },
    )
    .await;
    assert!(matches!(
        a.recv_reply("detach").await,
        ServerPayload::Detached { .. }
    ));

    b.send(
        "attach-2",
        ClientPayload::AttachSession {
            session_id: session_id.clone(),
        },
    )
    .await;
    assert!(matches!(
        b.recv_reply("attach-2").await,
        ServerPayload::Attached { .. }
    ));
}

#[tokio::test]
async fn chat_round_trip_streams_to_the_owner() {
    let daemon = start_daemon().await;
    let mut client = TestClient::connect(&daemon).await;
    let session_id = client.create_session().await;

    client
        .send(
            "chat",
            ClientPayload::SendChat {
                session_id: session_id.clone(),
                content: "hello daemon".into(),
            },
        )
        .await;
    assert!(matches!(
        client.recv_reply("chat").await,
        ServerPayload::ChatAccepted { .. }
    ));

    // The mock model echoes; expect the assistant message and then the
    // terminated progress event, in emission order.
    let mut saw_message = false;
    loop {
        let env = client.recv().await;
        match env.payload {
            ServerPayload::ChatMessage { content, role, .. } => {
                assert_eq!(role, "assistant");
                assert_eq!(content, "MOCK: hello daemon");
                saw_message = true;
            }
            ServerPayload::Progress { kind, detail, .. } if kind == "terminated" => {
                assert!(saw_message, "assistant message must precede termination");
                assert_eq!(detail["reason"], "done");
                break;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn unknown_type_gets_error_and_connection_survives() {
    let daemon = start_daemon().await;
    let mut client = TestClient::connect(&daemon).await;

    // Hand-rolled frame with a type the catalog does not know.
    let body = br#"{"request_id":"bogus-1","type":"frobnicate","data":{}}"#;
    let mut frame = Vec::new();
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    client.stream.write_all(&frame).await.unwrap();

    match client.recv_reply("bogus-1").await {
        ServerPayload::Error { code, .. } => assert_eq!(code, "unknown_type"),
        other => panic!("expected error, got {other:?}"),
    }

    // The connection is still serviceable.
    client.send("ws", ClientPayload::ListWorkspaces).await;
    assert!(matches!(
        client.recv_reply("ws").await,
        ServerPayload::WorkspaceList { .. }
    ));
}

#[tokio::test]
async fn stop_chat_without_running_turn_is_an_error() {
    let daemon = start_daemon().await;
    let mut client = TestClient::connect(&daemon).await;
    let session_id = client.create_session().await;

    client
        .send(
            "stop",
            ClientPayload::StopChat {
                session_id: session_id.clone(),
            },
        )
        .await;
    assert!(matches!(
        client.recv_reply("stop").await,
        ServerPayload::Error { .. }
    ));
}

#[tokio::test]
async fn save_then_list_shows_the_session() {
    let daemon = start_daemon().await;
    let mut client = TestClient::connect(&daemon).await;
    let session_id = client.create_session().await;

    // Run one turn so the session has content.
    client
        .send(
            "chat",
            ClientPayload::SendChat {
                session_id: session_id.clone(),
                content: "remember me".into(),
            },
        )
        .await;
    client.recv_reply("chat").await;
    // Wait for the turn to finish before saving.
    loop {
        let env = client.recv().await;
        if let ServerPayload::Progress { kind, .. } = &env.payload {
            if kind == "terminated" {
                break;
            }
        }
    }

    client
        .send(
            "save",
            ClientPayload::SaveSession {
                session_id: session_id.clone(),
            },
        )
        .await;
    assert!(matches!(
        client.recv_reply("save").await,
        ServerPayload::SessionSaved { .. }
    ));

    client
        .send(
            "list",
            ClientPayload::ListSessions {
                working_dir: Some("/tmp".into()),
            },
        )
        .await;
    match client.recv_reply("list").await {
        ServerPayload::SessionList { sessions } => {
            assert!(sessions.iter().any(|s| s.id == session_id));
        }
        other => panic!("expected session list, got {other:?}"),
    }
}
