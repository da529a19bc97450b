// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{resolve_path, Tool, ToolCall, ToolContext, ToolOutput};

/// Byte ceiling for a single read; larger files need offset/limit windows.
const READ_LIMIT_BYTES: usize = 100_000;

/// Read a file and record the read in the session, which is what later
/// entitles the model to edit that file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Use offset/limit (line numbers) to \
         window large files. Reading a file is required before editing it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, absolute or relative to the working directory" },
                "offset": { "type": "integer", "description": "1-based first line to read (optional)" },
                "limit": { "type": "integer", "description": "Maximum number of lines to read (optional)" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path' argument");
        };
        let abs = resolve_path(&ctx.working_dir, path);
        let text = match tokio::fs::read_to_string(&abs).await {
            Ok(t) => t,
            Err(e) => {
                return ToolOutput::err(&call.id, format!("cannot read {}: {e}", abs.display()))
            }
        };

        let offset = call
            .args
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize);

        let mut selected: String = match limit {
            Some(l) => text.lines().skip(offset).take(l).collect::<Vec<_>>().join("\n"),
            None if offset > 0 => text.lines().skip(offset).collect::<Vec<_>>().join("\n"),
            None => text,
        };
        if selected.len() > READ_LIMIT_BYTES {
            let mut cut = READ_LIMIT_BYTES;
            while !selected.is_char_boundary(cut) {
                cut -= 1;
            }
            let dropped = selected.len() - cut;
            selected.truncate(cut);
            selected.push_str(&format!(
                "\n[... {dropped} bytes omitted; re-read with offset/limit ...]"
            ));
        }

        ctx.session.lock().await.record_read(abs);
        ToolOutput::ok(&call.id, selected)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
