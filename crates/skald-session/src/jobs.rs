// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// One background process detached from its originating tool call.
///
/// The record is shared between the two output-reader tasks (which append
/// lines), the completion waiter (which sets `exit_code`/`completed`) and
/// any status queries; its mutex is held only for short copies.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub pid: u32,
    pub command: String,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
    pub completed: bool,
    /// Negated and passed to `kill(2)` to signal the whole process tree.
    pub process_group: i32,
}

impl JobRecord {
    pub fn new(
        id: impl Into<String>,
        pid: u32,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        process_group: i32,
    ) -> Self {
        Self {
            id: id.into(),
            pid,
            command: command.into(),
            working_dir: working_dir.into(),
            started_at: Utc::now(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            completed: false,
            process_group,
        }
    }
}

/// Shared handle to one background job.
#[derive(Clone)]
pub struct JobHandle {
    record: Arc<Mutex<JobRecord>>,
    done: Arc<watch::Sender<bool>>,
}

impl JobHandle {
    pub fn new(record: JobRecord) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            record: Arc::new(Mutex::new(record)),
            done: Arc::new(done),
        }
    }

    pub fn id(&self) -> String {
        self.record.lock().unwrap().id.clone()
    }

    /// Shared access to the record for the output-reader tasks.
    pub fn record(&self) -> Arc<Mutex<JobRecord>> {
        Arc::clone(&self.record)
    }

    /// Copy of the current record state.
    pub fn status(&self) -> JobRecord {
        self.record.lock().unwrap().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.record.lock().unwrap().completed
    }

    /// Mark the job finished and wake every waiter.
    pub fn complete(&self, exit_code: Option<i32>) {
        {
            let mut rec = self.record.lock().unwrap();
            rec.exit_code = exit_code;
            rec.completed = true;
        }
        // send_replace updates the value even with no receiver subscribed
        // yet, so a later wait() still observes completion.
        self.done.send_replace(true);
    }

    /// Wait until the job completes.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Per-session registry of background jobs, keyed by job id.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: JobHandle) {
        self.jobs.write().unwrap().insert(handle.id(), handle);
    }

    pub fn get(&self, id: &str) -> Option<JobHandle> {
        self.jobs.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<JobHandle> {
        self.jobs.write().unwrap().remove(id)
    }

    pub fn list(&self) -> Vec<JobRecord> {
        self.jobs
            .read()
            .unwrap()
            .values()
            .map(|h| h.status())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobRegistry({} jobs)", self.len())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> JobHandle {
        JobHandle::new(JobRecord::new(id, 4242, "sleep 30", "/tmp", 4242))
    }

    #[test]
    fn registry_insert_and_get() {
        let reg = JobRegistry::new();
        reg.insert(handle("j1"));
        assert!(reg.get("j1").is_some());
        assert!(reg.get("j2").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn complete_sets_exit_code() {
        let h = handle("j1");
        assert!(!h.is_completed());
        h.complete(Some(0));
        let rec = h.status();
        assert!(rec.completed);
        assert_eq!(rec.exit_code, Some(0));
    }

    #[tokio::test]
    async fn wait_returns_after_completion() {
        let h = handle("j1");
        let waiter = {
            let h = h.clone();
            tokio::spawn(async move { h.wait().await })
        };
        h.complete(Some(143));
        waiter.await.unwrap();
        assert_eq!(h.status().exit_code, Some(143));
    }

    #[tokio::test]
    async fn wait_on_already_completed_job_returns_immediately() {
        let h = handle("j1");
        h.complete(None);
        h.wait().await;
    }

    #[test]
    fn readers_append_lines_through_shared_record() {
        let h = handle("j1");
        {
            let rec = h.record();
            rec.lock().unwrap().stdout.push("line 1".into());
            rec.lock().unwrap().stderr.push("oops".into());
        }
        let status = h.status();
        assert_eq!(status.stdout, vec!["line 1"]);
        assert_eq!(status.stderr, vec!["oops"]);
    }
}
