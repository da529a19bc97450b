// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod client;
mod framing;
mod hub;
mod lockfile;
mod pending;
mod protocol;
mod server;
mod state;

pub use framing::{decode, encode, read_raw_frame, write_frame, MAX_FRAME_BYTES};
pub use hub::Hub;
pub use lockfile::{Lockfile, PidFile};
pub use pending::{
    AuthReply, PendingAuthorizations, PendingQuestions, QuestionReply, ACK_TIMEOUT,
    QUESTION_TIMEOUT, RESPONSE_TIMEOUT,
};
pub use protocol::{
    ClientPayload, Envelope, ServerPayload, SessionSummary, WorkspaceSummary,
};
pub use server::{default_socket_path, run, serve_unix_listener};
pub use state::DaemonState;
