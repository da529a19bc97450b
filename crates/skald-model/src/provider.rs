// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::{CompletionRequest, CompletionResponse};

/// Contract implemented by every LLM wire adapter.
///
/// The core never speaks a provider protocol itself: it builds a
/// [`CompletionRequest`], hands it to a provider, and consumes one whole
/// assistant turn.  Adapters live outside this workspace and register
/// themselves through the driver registry; the built-in `mock` driver is
/// enough for tests and offline runs.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Driver identifier, e.g. `"mock"`.
    fn name(&self) -> &str;
    /// Model name as forwarded to the provider API.
    fn model_name(&self) -> &str;
    /// Context window in tokens used for compaction budgeting.
    fn context_window(&self) -> usize {
        128_000
    }
    /// Run one completion and return the full assistant turn.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<CompletionResponse>;
}
