// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{resolve_path, Tool, ToolCall, ToolContext, ToolOutput};

/// Create a new file.  The dispatcher rejects the call when the path
/// already exists.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Fails if the file already \
         exists — use edit_file to change existing files. Parent directories \
         are created as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the new file" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn creates_path(&self, args: &Value) -> Option<PathBuf> {
        args.get("path").and_then(|v| v.as_str()).map(PathBuf::from)
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path' argument");
        };
        let Some(content) = call.args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'content' argument");
        };
        let abs = resolve_path(&ctx.working_dir, path);
        if let Some(parent) = abs.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(
                    &call.id,
                    format!("cannot create {}: {e}", parent.display()),
                );
            }
        }
        match tokio::fs::write(&abs, content).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("created {} ({} bytes)", abs.display(), content.len()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write {}: {e}", abs.display())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
