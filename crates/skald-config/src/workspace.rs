// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-workspace persisted configuration.
//!
//! A workspace is an absolute working-directory path shared by one or more
//! sessions.  The slice persisted here is what must survive restarts:
//! learned command/domain approvals, extra context directories, and the
//! frontend tab layout.  Everything else about a workspace is derived at
//! runtime.
//!
//! Saves are single-writer and atomic: the file is written to a temporary
//! sibling and renamed into place, so readers never observe a torn write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONFIG_FILE: &str = "workspace.json";

/// Frontend tab layout remembered across daemon restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenTabs {
    pub active_tab_id: Option<String>,
    #[serde(default)]
    pub tab_ids: Vec<String>,
    #[serde(default)]
    pub tab_names: BTreeMap<String, String>,
}

/// The persisted workspace-scoped configuration slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Approved shell command prefixes, e.g. `"git status"`.
    #[serde(default)]
    pub authorized_commands: BTreeMap<String, bool>,
    /// Approved domain patterns, e.g. `"*.github.com"`.
    #[serde(default)]
    pub authorized_domains: BTreeMap<String, bool>,
    /// Extra directories whose content is offered to the agent as context.
    #[serde(default)]
    pub context_directories: Vec<PathBuf>,
    #[serde(default)]
    pub open_tabs: OpenTabs,
}

impl WorkspaceConfig {
    /// Load the workspace config from `dir`.  A missing file is not an
    /// error: it loads as the empty default slice.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Atomically persist the config into `dir` (created if missing).
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(CONFIG_FILE);
        let tmp = dir.join(format!("{CONFIG_FILE}.tmp"));
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        debug!(path = %path.display(), "workspace config saved");
        Ok(())
    }

    /// Record an approved command prefix.
    pub fn authorize_command(&mut self, prefix: impl Into<String>) {
        self.authorized_commands.insert(prefix.into(), true);
    }

    /// Record an approved domain pattern.
    pub fn authorize_domain(&mut self, pattern: impl Into<String>) {
        self.authorized_domains.insert(pattern.into(), true);
    }

    /// True when a stored prefix approves `command`.
    pub fn command_approved(&self, command: &str) -> bool {
        self.authorized_commands
            .iter()
            .any(|(prefix, &on)| on && command_matches_prefix(command, prefix))
    }

    /// True when a stored pattern approves `domain`.
    pub fn domain_approved(&self, domain: &str) -> bool {
        self.authorized_domains
            .iter()
            .any(|(pattern, &on)| on && domain_matches_pattern(domain, pattern))
    }
}

/// A command matches a prefix when it is the prefix itself or extends it at
/// a token boundary.  `"git status"` approves `"git status -s"` but not
/// `"git statusx"`.
pub fn command_matches_prefix(command: &str, prefix: &str) -> bool {
    let command = command.trim();
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return false;
    }
    command == prefix
        || command
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Match a domain against a stored pattern.  `*.github.com` matches
/// `api.github.com` and `github.com`; a bare pattern matches exactly or any
/// subdomain of it.
pub fn domain_matches_pattern(domain: &str, pattern: &str) -> bool {
    let base = pattern.strip_prefix("*.").unwrap_or(pattern);
    if base.is_empty() {
        return false;
    }
    domain == base || domain.ends_with(&format!(".{base}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
