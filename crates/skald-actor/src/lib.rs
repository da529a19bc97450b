// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Minimal actor substrate: typed bounded mailboxes, one worker task per
//! actor, cooperative stop with a drain deadline, and derived health.
//!
//! # Design
//!
//! ```text
//!   producer ──► ActorRef::send ──► bounded mpsc ──► worker task
//!                   (try_send,                         │ receive() serially
//!                    drop-on-full)                     │ errors logged, loop survives
//!                                                      ▼
//!   ActorRef::stop(deadline) ──► watch signal ──► drain + on_undelivered + stop()
//! ```
//!
//! Two delivery disciplines exist.  The default is fire-and-forget with
//! drop-on-full: `send` never blocks and the sender must handle a full
//! mailbox.  The sequential discipline (`send_seq`, or `deliver` on an actor
//! spawned with `SpawnOptions::sequential`) parks the sender until the
//! actor's `receive` for that message has completed, for producers that must
//! observe ordering with the consumer.

mod actor;
mod health;
mod supervisor;

pub use actor::{spawn, Actor, ActorContext, ActorRef, SendError, SpawnOptions, StopError};
pub use health::{HealthProbe, HealthReport, HealthStatus};
pub use supervisor::{Supervisor, SystemHealth};
