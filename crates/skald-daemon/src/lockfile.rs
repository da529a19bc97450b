// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Single-instance enforcement.
//!
//! The lockfile carries two lines — the holder's PID and an RFC3339
//! timestamp — and lives in the socket directory.  A reader treats it as
//! stale when the PID is no longer running or the timestamp is over an
//! hour old; stale locks are reclaimed.  The PID file mirrors just the PID
//! for external tooling.  Both are best-effort removed on shutdown.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

const LOCK_NAME: &str = "daemon.lock";
const PID_NAME: &str = "daemon.pid";

/// Locks older than this are stale regardless of the PID.
const STALE_AGE: chrono::Duration = chrono::Duration::hours(1);

#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    /// Acquire the lock in `dir`, reclaiming a stale one.
    ///
    /// Failure here is fatal for daemon startup: another live instance
    /// holds the socket directory.
    pub fn acquire(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(LOCK_NAME);

        if path.exists() {
            match read_lock(&path) {
                Some((pid, stamp)) if !is_stale(pid, stamp) => {
                    anyhow::bail!(
                        "another instance (pid {pid}) holds the lock at {}",
                        path.display()
                    );
                }
                other => {
                    match other {
                        Some((pid, _)) => {
                            info!(pid, "reclaiming stale lockfile");
                        }
                        None => warn!("reclaiming unreadable lockfile"),
                    }
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        let content = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        // create_new closes the race against a concurrently starting daemon.
        let result = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path);
        match result {
            Ok(mut f) => {
                use std::io::Write;
                f.write_all(content.as_bytes())
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                anyhow::bail!("lost the lockfile race at {}", path.display());
            }
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_lock(path: &Path) -> Option<(i32, DateTime<Utc>)> {
    let text = std::fs::read_to_string(path).ok()?;
    let mut lines = text.lines();
    let pid: i32 = lines.next()?.trim().parse().ok()?;
    let stamp = DateTime::parse_from_rfc3339(lines.next()?.trim())
        .ok()?
        .with_timezone(&Utc);
    Some((pid, stamp))
}

fn is_stale(pid: i32, stamp: DateTime<Utc>) -> bool {
    if Utc::now() - stamp > STALE_AGE {
        return true;
    }
    !pid_running(pid)
}

#[cfg(unix)]
fn pid_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 probes for existence; EPERM still means "running".
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_running(_pid: i32) -> bool {
    // No cheap probe; rely on the timestamp alone.
    true
}

/// Mirrors the PID for external tooling (`kill $(cat daemon.pid)`).
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn write(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(PID_NAME);
        std::fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
