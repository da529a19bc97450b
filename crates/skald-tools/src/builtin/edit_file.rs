// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{resolve_path, Tool, ToolCall, ToolContext, ToolOutput};

/// String-replacement edit on an existing file.  The read-before-edit
/// precondition is enforced by the dispatcher, not here.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in an existing file. 'old_string' must match \
         exactly once, including whitespace; widen it with surrounding context \
         until it is unique. The file must have been read earlier in the session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old_string": { "type": "string", "description": "Exact text to replace (must be unique)" },
                "new_string": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    fn edits_path(&self, args: &Value) -> Option<PathBuf> {
        args.get("path").and_then(|v| v.as_str()).map(PathBuf::from)
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path' argument");
        };
        let (Some(old), Some(new)) = (
            call.args.get("old_string").and_then(|v| v.as_str()),
            call.args.get("new_string").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'old_string' / 'new_string' arguments");
        };
        if old.is_empty() {
            return ToolOutput::err(&call.id, "'old_string' must not be empty");
        }

        let abs = resolve_path(&ctx.working_dir, path);
        let text = match tokio::fs::read_to_string(&abs).await {
            Ok(t) => t,
            Err(e) => {
                return ToolOutput::err(&call.id, format!("cannot read {}: {e}", abs.display()))
            }
        };

        let matches = text.matches(old).count();
        if matches == 0 {
            return ToolOutput::err(
                &call.id,
                format!("'old_string' not found in {}", abs.display()),
            );
        }
        if matches > 1 {
            return ToolOutput::err(
                &call.id,
                format!(
                    "'old_string' matches {matches} times in {}; add surrounding \
                     context to make it unique",
                    abs.display()
                ),
            );
        }

        let updated = text.replacen(old, new, 1);
        match tokio::fs::write(&abs, updated).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("edited {}", abs.display())),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write {}: {e}", abs.display())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
