// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skald_model::Message;

use crate::jobs::JobRegistry;

/// Errors raised by the message-log invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// A tool-result message referenced a call id no assistant message declared.
    #[error("tool result references unknown tool id '{0}'")]
    UnknownToolId(String),
    /// The same tool call id was declared or answered twice.
    #[error("duplicate tool id '{0}'")]
    DuplicateToolId(String),
    /// A tool-role message carried no tool id at all.
    #[error("tool message without a tool id")]
    MissingToolId,
}

/// In-memory conversation session.
///
/// The message log is append-only and invariant-checked on every push; the
/// secondary state (read/modified paths, jobs, title) changes freely.  Every
/// mutation marks the session dirty; the auto-saver clears the flag once the
/// snapshot it wrote is confirmed on disk.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub working_dir: PathBuf,
    messages: Vec<Message>,
    files_read: HashSet<PathBuf>,
    files_modified: HashSet<PathBuf>,
    pub jobs: JobRegistry,
    title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    dirty: bool,
    /// Tool-call ids declared by assistant messages so far.
    declared_tool_ids: HashSet<String>,
    /// Tool-call ids already answered by a tool-result message.
    answered_tool_ids: HashSet<String>,
}

impl Session {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            working_dir: working_dir.into(),
            messages: Vec::new(),
            files_read: HashSet::new(),
            files_modified: HashSet::new(),
            jobs: JobRegistry::new(),
            title: None,
            created_at: now,
            updated_at: now,
            dirty: false,
            declared_tool_ids: HashSet::new(),
            answered_tool_ids: HashSet::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.touch();
    }

    /// Lazily derive a title from the first user message when none is set.
    pub fn ensure_title(&mut self) {
        if self.title.is_some() {
            return;
        }
        if let Some(first) = self
            .messages
            .iter()
            .find(|m| m.role == skald_model::Role::User)
        {
            let line = first.content.lines().next().unwrap_or("").trim();
            if !line.is_empty() {
                let title: String = line.chars().take(60).collect();
                self.set_title(title);
            }
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.updated_at = Utc::now();
    }

    /// Append a message, enforcing the tool-binding invariants.
    pub fn push(&mut self, msg: Message) -> Result<(), SessionError> {
        if let Some(calls) = &msg.tool_calls {
            for c in calls {
                if !self.declared_tool_ids.insert(c.id.clone()) {
                    return Err(SessionError::DuplicateToolId(c.id.clone()));
                }
            }
        }
        if msg.role == skald_model::Role::Tool {
            let id = msg.tool_id.as_ref().ok_or(SessionError::MissingToolId)?;
            if !self.declared_tool_ids.contains(id) {
                return Err(SessionError::UnknownToolId(id.clone()));
            }
            if !self.answered_tool_ids.insert(id.clone()) {
                return Err(SessionError::DuplicateToolId(id.clone()));
            }
        }
        self.messages.push(msg);
        self.touch();
        Ok(())
    }

    /// Replace the whole message log (compaction, load, edit-and-resubmit).
    /// The tool-id bookkeeping is rebuilt from the new list; the list itself
    /// is taken as-is.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.declared_tool_ids.clear();
        self.answered_tool_ids.clear();
        for m in &messages {
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    self.declared_tool_ids.insert(c.id.clone());
                }
            }
            if let Some(id) = &m.tool_id {
                self.answered_tool_ids.insert(id.clone());
            }
        }
        self.messages = messages;
        self.touch();
    }

    /// A session can be resumed unless its last message is an assistant
    /// message still waiting for tool results.
    pub fn can_resume(&self) -> bool {
        !self.messages.last().is_some_and(|m| m.has_tool_calls())
    }

    /// True when an assistant message already declared this tool-call id.
    /// Callers appending model output use this to de-duplicate ids a
    /// misbehaving model reuses, before `push` would reject them.
    pub fn tool_id_declared(&self, id: &str) -> bool {
        self.declared_tool_ids.contains(id)
    }

    // ── File tracking ─────────────────────────────────────────────────────────

    pub fn record_read(&mut self, path: impl Into<PathBuf>) {
        self.files_read.insert(path.into());
        self.touch();
    }

    pub fn record_modified(&mut self, path: impl Into<PathBuf>) {
        self.files_modified.insert(path.into());
        self.touch();
    }

    pub fn was_read(&self, path: &Path) -> bool {
        self.files_read.contains(path)
    }

    pub fn files_read(&self) -> &HashSet<PathBuf> {
        &self.files_read
    }

    pub fn files_modified(&self) -> &HashSet<PathBuf> {
        &self.files_modified
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut files_read: Vec<PathBuf> = self.files_read.iter().cloned().collect();
        files_read.sort();
        let mut files_modified: Vec<PathBuf> = self.files_modified.iter().cloned().collect();
        files_modified.sort();
        SessionSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            working_dir: self.working_dir.clone(),
            messages: self.messages.clone(),
            files_read,
            files_modified,
        }
    }

    pub fn from_snapshot(snap: SessionSnapshot) -> Self {
        let mut s = Self::new(snap.working_dir);
        s.id = snap.id;
        s.title = snap.title;
        s.created_at = snap.created_at;
        s.replace_messages(snap.messages);
        s.files_read = snap.files_read.into_iter().collect();
        s.files_modified = snap.files_modified.into_iter().collect();
        s.updated_at = snap.updated_at;
        s.dirty = false;
        s
    }

    /// Clear the dirty flag for a snapshot taken at `as_of`.  A concurrent
    /// mutation after the snapshot keeps the session dirty.
    pub fn mark_saved(&mut self, as_of: DateTime<Utc>) {
        if self.updated_at == as_of {
            self.dirty = false;
        }
    }
}

/// The serde view of a session as persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub working_dir: PathBuf,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub files_read: Vec<PathBuf>,
    #[serde(default)]
    pub files_modified: Vec<PathBuf>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
