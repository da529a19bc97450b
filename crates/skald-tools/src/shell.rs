// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Long-running shell process lifecycle.
//!
//! Every command runs as `sh -c <cmd>` in a fresh process group (`setsid`)
//! so one signal reaches the whole tree.  Two reader tasks drain stdout and
//! stderr into line buffers on the shared job record; a waiter task reaps
//! the child and marks the record completed.
//!
//! A foreground run simply waits on the record.  The control channel can
//! flip an in-flight run to the background: the job is registered in the
//! session's registry, the call returns `{job_id, pid}` immediately, and
//! the readers keep draining into the record.  Backgrounded jobs are
//! deliberately detached — cancelling the chat turn does not kill them.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use skald_session::{JobHandle, JobRecord, JobRegistry};

use crate::tool::ExecMetadata;

/// Signals accepted by an in-flight foreground run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellControl {
    /// Detach the process into a background job and return immediately.
    Background,
}

#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

/// Returned when a run was sent to the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStarted {
    pub job_id: String,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct ShellOutcome {
    pub pid: u32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Set when the run was detached; the other fields then hold whatever
    /// output had been collected at detach time.
    pub background: Option<JobStarted>,
    pub metadata: ExecMetadata,
}

/// Signalling endpoint for one process group.
///
/// On Unix the negated group id reaches the whole tree.  Windows has no
/// process groups here: both operations degrade to a hard kill through the
/// process handle held by the waiter, so `terminate` is a kill request.
pub(crate) struct ProcessGroup(i32);

impl ProcessGroup {
    pub(crate) fn new(pgid: i32) -> Self {
        Self(pgid)
    }

    pub(crate) fn terminate(&self) {
        #[cfg(unix)]
        unsafe {
            libc::kill(-self.0, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        self.kill();
    }

    pub(crate) fn kill(&self) {
        #[cfg(unix)]
        unsafe {
            libc::kill(-self.0, libc::SIGKILL);
        }
    }

    #[cfg(all(unix, test))]
    pub(crate) fn exists(&self) -> bool {
        unsafe { libc::kill(-self.0, 0) == 0 }
    }
}

/// Runs shell commands and manages their background lifecycle.
pub struct ShellRunner {
    /// Time between SIGTERM and SIGKILL when stopping a job.
    pub grace: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
        }
    }
}

impl ShellRunner {
    /// Run a command to completion, timeout, or detach.
    pub async fn run(
        &self,
        opts: ShellOptions,
        control: &mut mpsc::Receiver<ShellControl>,
        jobs: &JobRegistry,
    ) -> anyhow::Result<ShellOutcome> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&opts.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(wd) = &opts.working_dir {
            cmd.current_dir(wd);
        }
        // setsid() detaches the child from the controlling terminal and makes
        // it the leader of a fresh process group, so signalling -pid reaches
        // every descendant.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning: {}", opts.command))?;
        let pid = child.id().unwrap_or_default();
        let pgid = pid as i32;
        debug!(pid, cmd = %opts.command, "shell process started");

        let job = JobHandle::new(JobRecord::new(
            Uuid::new_v4().to_string(),
            pid,
            &opts.command,
            opts.working_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            pgid,
        ));

        let stdout = child
            .stdout
            .take()
            .context("child stdout was not piped")?;
        let stderr = child
            .stderr
            .take()
            .context("child stderr was not piped")?;
        let out_reader = tokio::spawn(read_lines(stdout, job.record(), Stream::Stdout));
        let err_reader = tokio::spawn(read_lines(stderr, job.record(), Stream::Stderr));

        // The waiter owns the child: it reaps the process, waits for the
        // readers to hit EOF, and completes the job record.  Spawning it up
        // front gives foreground and background runs one code path.
        let waiter_job = job.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = out_reader.await;
            let _ = err_reader.await;
            let code = match status {
                Ok(s) => exit_code_of(&s),
                Err(e) => {
                    warn!("waiting for shell child: {e}");
                    None
                }
            };
            waiter_job.complete(code);
        });

        let timeout = tokio::time::sleep(opts.timeout);
        tokio::pin!(timeout);
        let mut control_open = true;

        loop {
            tokio::select! {
                _ = job.wait() => {
                    let rec = job.status();
                    return Ok(outcome_from(rec, false, None, started));
                }
                ctrl = control.recv(), if control_open => match ctrl {
                    Some(ShellControl::Background) => {
                        jobs.insert(job.clone());
                        let rec = job.status();
                        let job_started = JobStarted {
                            job_id: rec.id.clone(),
                            pid,
                        };
                        debug!(job_id = %job_started.job_id, pid, "shell run detached to background");
                        return Ok(outcome_from(rec, false, Some(job_started), started));
                    }
                    None => control_open = false,
                },
                _ = &mut timeout => {
                    warn!(pid, cmd = %opts.command, "shell timeout; killing process group");
                    ProcessGroup::new(pgid).kill();
                    job.wait().await;
                    let rec = job.status();
                    return Ok(outcome_from(rec, true, None, started));
                }
            }
        }
    }

    /// Stop a background job: SIGTERM to the group, then SIGKILL after the
    /// grace period if it has not exited.
    pub async fn stop_job(&self, job: &JobHandle) {
        let group = ProcessGroup::new(job.status().process_group);
        group.terminate();
        tokio::select! {
            _ = job.wait() => {}
            _ = tokio::time::sleep(self.grace) => {
                warn!(job_id = %job.id(), "job ignored SIGTERM; escalating to SIGKILL");
                group.kill();
                job.wait().await;
            }
        }
    }
}

fn outcome_from(
    rec: JobRecord,
    timed_out: bool,
    background: Option<JobStarted>,
    started: Instant,
) -> ShellOutcome {
    let bytes: usize = rec
        .stdout
        .iter()
        .chain(rec.stderr.iter())
        .map(|l| l.len() + 1)
        .sum();
    let lines = rec.stdout.len() + rec.stderr.len();
    ShellOutcome {
        pid: rec.pid,
        exit_code: rec.exit_code,
        stdout: rec.stdout,
        stderr: rec.stderr,
        timed_out,
        background,
        metadata: ExecMetadata {
            duration_ms: started.elapsed().as_millis() as u64,
            bytes,
            lines,
        },
    }
}

enum Stream {
    Stdout,
    Stderr,
}

/// Drain one pipe into the job record, splitting on `\n` and trimming a
/// trailing `\r`.
async fn read_lines(
    pipe: impl AsyncRead + Unpin,
    record: std::sync::Arc<Mutex<JobRecord>>,
    stream: Stream,
) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
        let mut rec = record.lock().unwrap();
        match stream {
            Stream::Stdout => rec.stdout.push(line),
            Stream::Stderr => rec.stderr.push(line),
        }
    }
}

fn exit_code_of(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|s| 128 + s))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn opts(command: &str, timeout: Duration) -> ShellOptions {
        ShellOptions {
            command: command.into(),
            working_dir: None,
            timeout,
        }
    }

    async fn run(command: &str, timeout: Duration) -> (ShellOutcome, JobRegistry) {
        let runner = ShellRunner::default();
        let jobs = JobRegistry::new();
        let (_tx, mut rx) = mpsc::channel(1);
        let outcome = runner.run(opts(command, timeout), &mut rx, &jobs).await.unwrap();
        (outcome, jobs)
    }

    #[tokio::test]
    async fn captures_stdout_lines() {
        let (out, _) = run("printf 'a\\nb\\n'", Duration::from_secs(5)).await;
        assert_eq!(out.stdout, vec!["a", "b"]);
        assert_eq!(out.exit_code, Some(0));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn trims_carriage_returns() {
        let (out, _) = run("printf 'dos\\r\\n'", Duration::from_secs(5)).await;
        assert_eq!(out.stdout, vec!["dos"]);
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let (out, _) = run("echo oops >&2", Duration::from_secs(5)).await;
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr, vec!["oops"]);
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let (out, _) = run("exit 3", Duration::from_secs(5)).await;
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn metadata_counts_lines_and_duration() {
        let (out, _) = run("printf '1\\n2\\n3\\n'", Duration::from_secs(5)).await;
        let meta = out.metadata;
        assert_eq!(meta.lines, 3);
        assert!(meta.bytes >= 6);
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let runner = ShellRunner::default();
        let jobs = JobRegistry::new();
        let (_tx, mut rx) = mpsc::channel(1);
        let outcome = runner
            .run(
                opts("sleep 30 & sleep 30", Duration::from_millis(200)),
                &mut rx,
                &jobs,
            )
            .await
            .unwrap();
        assert!(outcome.timed_out);
        // SIGKILL → 128 + 9
        assert_eq!(outcome.exit_code, Some(137));
    }

    #[tokio::test]
    async fn background_returns_job_immediately() {
        let runner = ShellRunner::default();
        let jobs = JobRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(ShellControl::Background).await.unwrap();
        let started = Instant::now();
        let outcome = runner
            .run(opts("sleep 20", Duration::from_secs(60)), &mut rx, &jobs)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        let job_started = outcome.background.expect("backgrounded");
        assert!(job_started.pid > 0);

        let job = jobs.get(&job_started.job_id).expect("registered");
        assert!(!job.is_completed());

        // stop: SIGTERM is enough for sleep.
        runner.stop_job(&job).await;
        let rec = job.status();
        assert!(rec.completed);
        // SIGTERM → 128 + 15
        assert_eq!(rec.exit_code, Some(143));
    }

    #[tokio::test]
    async fn background_job_keeps_collecting_output() {
        let runner = ShellRunner::default();
        let jobs = JobRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(ShellControl::Background).await.unwrap();
        let outcome = runner
            .run(
                opts("sleep 0.2; echo late-line", Duration::from_secs(60)),
                &mut rx,
                &jobs,
            )
            .await
            .unwrap();
        let job = jobs.get(&outcome.background.unwrap().job_id).unwrap();
        job.wait().await;
        let rec = job.status();
        assert_eq!(rec.stdout, vec!["late-line"]);
        assert_eq!(rec.exit_code, Some(0));
    }

    #[tokio::test]
    async fn process_group_no_longer_exists_after_timeout() {
        let runner = ShellRunner::default();
        let jobs = JobRegistry::new();
        let (_tx, mut rx) = mpsc::channel(1);
        let outcome = runner
            .run(opts("sleep 30", Duration::from_millis(100)), &mut rx, &jobs)
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, Some(137));
        // The group leader is reaped; nothing is left to signal.
        // A short settling delay avoids racing the kernel's reparenting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ProcessGroup::new(outcome.pid as i32).exists());
    }
}
