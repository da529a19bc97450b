// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod authorize;
mod blocklist;
mod credential;
mod interact;

pub use authorize::{
    spawn_authorization, AuthMsg, AuthScope, AuthorizationActor, AuthorizationClient,
    AuthorizationSetup,
};
pub use blocklist::{
    parse_rpz, seed_cache, spawn_domain_blocker, BlocklistHandle, BlocklistMsg,
    BlocklistSnapshot, DomainBlockerActor,
};
pub use credential::{CredentialGate, GateState, MAX_UNLOCK_ATTEMPTS};
pub use interact::{
    spawn_interactions, InteractMsg, InteractionActor, InteractionHandler, InteractionKind,
    InteractionMetrics, InteractionRequest, InteractionResponse, Interactions,
};
