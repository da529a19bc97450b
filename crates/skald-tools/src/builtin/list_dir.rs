// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{resolve_path, Tool, ToolCall, ToolContext, ToolOutput};

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, sorted by name. Directories are \
         suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list (defaults to the working directory)" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let abs = resolve_path(&ctx.working_dir, path);
        let mut read_dir = match tokio::fs::read_dir(&abs).await {
            Ok(rd) => rd,
            Err(e) => {
                return ToolOutput::err(&call.id, format!("cannot list {}: {e}", abs.display()))
            }
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        ToolOutput::ok(&call.id, entries.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use skald_session::Session;

    use super::*;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = ToolContext::permissive(dir.path(), Arc::new(Mutex::new(Session::new(dir.path()))));
        let out = ListDirTool
            .execute(
                &ctx,
                &ToolCall {
                    id: "l1".into(),
                    name: "list_dir".into(),
                    args: json!({}),
                },
            )
            .await;
        assert_eq!(out.content, "a.txt\nb.txt\nsub/");
    }
}
