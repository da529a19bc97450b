// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Socket framing: every message is a 4-byte big-endian length prefix
//! followed by that many bytes of UTF-8 JSON.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::Envelope;

/// Frames larger than this are a protocol violation.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Serialize an envelope into one wire frame (prefix + JSON).
pub fn encode<P: Serialize>(env: &Envelope<P>) -> anyhow::Result<Vec<u8>> {
    let body = serde_json::to_vec(env).context("encoding envelope")?;
    anyhow::ensure!(body.len() <= MAX_FRAME_BYTES, "frame exceeds size limit");
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse a frame body into a typed envelope.
pub fn decode<P: DeserializeOwned>(body: &[u8]) -> anyhow::Result<Envelope<P>> {
    serde_json::from_slice(body).context("decoding envelope")
}

/// Read one frame body.  `Ok(None)` is a clean EOF (peer closed between
/// frames); closing mid-frame is an error.
pub async fn read_raw_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = r
            .read(&mut len_buf[filled..])
            .await
            .context("reading frame length")?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            anyhow::bail!("connection closed mid-frame");
        }
        filled += n;
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_BYTES, "frame of {len} bytes exceeds limit");
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)
        .await
        .context("reading frame body")?;
    Ok(Some(body))
}

/// Encode and write one envelope.
pub async fn write_frame<W: AsyncWrite + Unpin, P: Serialize>(
    w: &mut W,
    env: &Envelope<P>,
) -> anyhow::Result<()> {
    let frame = encode(env)?;
    w.write_all(&frame).await.context("writing frame")?;
    w.flush().await.context("flushing frame")?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::protocol::{ClientPayload, ServerPayload};

    use super::*;

    #[tokio::test]
    async fn frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let env = Envelope {
            request_id: "r1".into(),
            payload: ClientPayload::SendChat {
                session_id: "s1".into(),
                content: "hello".into(),
            },
        };
        write_frame(&mut a, &env).await.unwrap();
        drop(a);
        let body = read_raw_frame(&mut b).await.unwrap().unwrap();
        let back: Envelope<ClientPayload> = decode(&body).unwrap();
        assert_eq!(back, env);
        // Clean EOF after the single frame.
        assert!(read_raw_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mid_frame_eof_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(a);
        assert!(read_raw_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();
        assert!(read_raw_frame(&mut b).await.is_err());
    }

    #[test]
    fn every_server_variant_round_trips() {
        let samples = vec![
            ServerPayload::SessionCreated {
                session_id: "s".into(),
                working_dir: "/w".into(),
            },
            ServerPayload::ChatMessage {
                session_id: "s".into(),
                role: "assistant".into(),
                content: "hi".into(),
            },
            ServerPayload::ToolCall {
                session_id: "s".into(),
                call_id: "c".into(),
                tool_name: "shell".into(),
                args: serde_json::json!({"command": "ls"}),
            },
            ServerPayload::AuthorizationRequest {
                id: "a".into(),
                description: "run ls".into(),
                fingerprint: "command:ls".into(),
                suggested_prefix: Some("ls".into()),
            },
            ServerPayload::Error {
                code: "unknown_type".into(),
                message: "nope".into(),
            },
        ];
        for payload in samples {
            let env = Envelope {
                request_id: "r".into(),
                payload,
            };
            let bytes = encode(&env).unwrap();
            let back: Envelope<ServerPayload> = decode(&bytes[4..]).unwrap();
            assert_eq!(back, env);
        }
    }

    #[test]
    fn wire_shape_is_type_request_id_data() {
        let env = Envelope {
            request_id: "r9".into(),
            payload: ClientPayload::ListWorkspaces,
        };
        let bytes = encode(&env).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes[4..]).unwrap();
        assert_eq!(v["type"], "list_workspaces");
        assert_eq!(v["request_id"], "r9");
    }
}
