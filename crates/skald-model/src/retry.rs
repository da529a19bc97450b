// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::{CompletionRequest, CompletionResponse, ModelProvider};

/// Base delay before the first retry; each attempt doubles it.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Call the model, retrying transport failures with exponential backoff.
///
/// Up to `max_attempts` calls are made (the spec default is 3).  A small
/// random jitter is added to each delay so concurrent sessions do not
/// retry in lockstep.  Cancellation is the caller's concern: callers race
/// this future against their context (`tokio::select!`), which drops the
/// in-flight attempt without retrying it.
pub async fn complete_with_retry(
    provider: &dyn ModelProvider,
    req: CompletionRequest,
    max_attempts: u32,
) -> anyhow::Result<CompletionResponse> {
    let attempts = max_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
            tokio::time::sleep(backoff + jitter).await;
        }
        match provider.complete(req.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                warn!(
                    attempt = attempt + 1,
                    max = attempts,
                    model = provider.model_name(),
                    "model completion failed: {e}"
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt was made"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
