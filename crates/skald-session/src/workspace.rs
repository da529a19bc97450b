// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};

/// A workspace: an absolute working-directory path shared by one or more
/// sessions, plus what can be derived from it at runtime.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub vcs_root: Option<PathBuf>,
    pub branch: Option<String>,
    pub context_directories: Vec<PathBuf>,
    pub session_count: usize,
}

impl Workspace {
    /// Probe `root` for a VCS checkout by walking up to the nearest `.git`.
    pub fn detect(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let vcs_root = find_git_root(&root);
        let branch = vcs_root.as_deref().and_then(read_git_branch);
        Self {
            root,
            vcs_root,
            branch,
            context_directories: Vec::new(),
            session_count: 0,
        }
    }
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        if d.join(".git").exists() {
            return Some(d.to_path_buf());
        }
        dir = d.parent();
    }
    None
}

/// Read the current branch from `.git/HEAD` without shelling out.
/// Detached heads (raw commit hash) yield `None`.
fn read_git_branch(repo: &Path) -> Option<String> {
    let head = std::fs::read_to_string(repo.join(".git/HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

/// Record of a worktree this process created, for shutdown cleanup.
#[derive(Debug, Clone)]
struct WorktreeRecord {
    repo: PathBuf,
    path: PathBuf,
}

/// Tracks known workspaces and the session worktrees created for them.
#[derive(Debug, Default)]
pub struct WorkspaceManager {
    workspaces: HashMap<PathBuf, Workspace>,
    worktrees: Vec<WorktreeRecord>,
}

impl WorkspaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or detect the workspace for `root`.
    pub fn workspace(&mut self, root: &Path) -> &mut Workspace {
        self.workspaces
            .entry(root.to_path_buf())
            .or_insert_with(|| Workspace::detect(root))
    }

    pub fn list(&self) -> Vec<Workspace> {
        self.workspaces.values().cloned().collect()
    }

    pub fn add_session(&mut self, root: &Path) {
        self.workspace(root).session_count += 1;
    }

    pub fn remove_session(&mut self, root: &Path) {
        let ws = self.workspace(root);
        ws.session_count = ws.session_count.saturating_sub(1);
    }

    /// Create a git worktree for `session_name` as a sibling directory
    /// `{repo}-{session_name}` on a fresh branch `session/{session_name}`.
    pub async fn create_worktree(
        &mut self,
        repo: &Path,
        session_name: &str,
    ) -> anyhow::Result<PathBuf> {
        let repo_name = repo
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        let parent = repo.parent().unwrap_or(Path::new("."));
        let path = parent.join(format!("{repo_name}-{session_name}"));
        let branch = format!("session/{session_name}");

        let output = tokio::process::Command::new("git")
            .current_dir(repo)
            .args(["worktree", "add", "-b", &branch])
            .arg(&path)
            .output()
            .await
            .context("spawning git worktree add")?;
        if !output.status.success() {
            anyhow::bail!(
                "git worktree add failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!(path = %path.display(), branch = %branch, "session worktree created");
        self.worktrees.push(WorktreeRecord {
            repo: repo.to_path_buf(),
            path: path.clone(),
        });
        Ok(path)
    }

    /// Remove every worktree this manager created.  Called at shutdown;
    /// failures are logged and do not abort the drain.
    pub async fn cleanup_worktrees(&mut self) {
        for record in self.worktrees.drain(..) {
            debug!(path = %record.path.display(), "removing session worktree");
            let result = tokio::process::Command::new("git")
                .current_dir(&record.repo)
                .args(["worktree", "remove", "--force"])
                .arg(&record.path)
                .output()
                .await;
            match result {
                Ok(out) if out.status.success() => {}
                Ok(out) => warn!(
                    path = %record.path.display(),
                    "git worktree remove failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
                Err(e) => warn!(path = %record.path.display(), "git worktree remove: {e}"),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
