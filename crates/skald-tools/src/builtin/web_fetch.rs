// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{AuthRequest, Tool, ToolCall, ToolContext, ToolOutput};

/// Byte ceiling for fetched bodies.
const FETCH_LIMIT_BYTES: usize = 200_000;

/// Fetch a URL over HTTP(S).  The target domain is checked against the
/// blocklist here and against the authorization ladder by the dispatcher
/// (the `Domain` fingerprint lets the user approve e.g. `*.github.com`
/// once).
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

/// Extract the host part of a URL without parsing the full grammar:
/// scheme and userinfo are stripped, then everything up to the first
/// `/`, `?`, `#` or `:` is the domain, lowercased.
pub fn extract_domain(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);
    let host = rest
        .split(['/', '?', '#'])
        .next()?
        .split(':')
        .next()?
        .trim()
        .to_ascii_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return the response body as text. Only http(s) URLs \
         are accepted; the target domain is subject to the domain blocklist \
         and per-domain authorization."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The http(s) URL to fetch" }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn authorization_request(&self, args: &Value) -> Option<AuthRequest> {
        let url = args.get("url")?.as_str()?;
        extract_domain(url).map(|domain| AuthRequest::Domain { domain })
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(url) = call.args.get("url").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'url' argument");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, "only http(s) URLs are supported");
        }
        let Some(domain) = extract_domain(url) else {
            return ToolOutput::err(&call.id, format!("cannot extract domain from '{url}'"));
        };
        if ctx.domains.is_blocked(&domain) {
            return ToolOutput::err(&call.id, format!("blocked domain: {domain}"));
        }

        debug!(url, "web_fetch");
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch failed: {e}")),
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("reading body failed: {e}")),
        };
        let mut body = body;
        if body.len() > FETCH_LIMIT_BYTES {
            let mut cut = FETCH_LIMIT_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("\n[... body truncated ...]");
        }
        if status.is_success() {
            ToolOutput::ok(&call.id, body)
        } else {
            ToolOutput::err(&call.id, format!("[status {status}]\n{body}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
