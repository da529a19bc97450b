// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Mailbox fill fraction above which an actor counts as backed up.
const MAILBOX_PRESSURE: f64 = 0.9;
/// An error younger than this counts against the actor's health.
const RECENT_ERROR_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Idle longer than this counts against health, but only once the actor has
/// been up long enough for idleness to be meaningful.
const IDLE_LIMIT: Duration = Duration::from_secs(60 * 60);
const IDLE_MIN_UPTIME: Duration = Duration::from_secs(30 * 60);

/// Sentinel for "never happened" in the millisecond counters.
const NEVER: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A point-in-time health snapshot for one actor.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub id: String,
    pub status: HealthStatus,
    pub errors_total: u64,
    pub mailbox_depth: usize,
    pub mailbox_capacity: usize,
    pub uptime: Duration,
    /// Time since the last processed message (uptime when none yet).
    pub idle: Duration,
    pub custom: Option<serde_json::Value>,
}

/// Anything that can produce a health report.  Implemented by `ActorRef`;
/// the supervisor polls a list of these.
pub trait HealthProbe: Send + Sync {
    fn id(&self) -> &str;
    fn report(&self) -> HealthReport;
}

/// Shared mutable health counters, updated by the worker loop and read by
/// probes without locking.
pub struct HealthState {
    started: Instant,
    mailbox_capacity: usize,
    errors_total: AtomicU64,
    /// Milliseconds since `started` of the most recent error.
    last_error_ms: AtomicU64,
    /// Milliseconds since `started` of the most recent processed message.
    last_activity_ms: AtomicU64,
}

impl HealthState {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            started: Instant::now(),
            mailbox_capacity,
            errors_total: AtomicU64::new(0),
            last_error_ms: AtomicU64::new(NEVER),
            last_activity_ms: AtomicU64::new(NEVER),
        }
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        self.last_error_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    pub fn record_activity(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    pub fn report(
        &self,
        id: &str,
        mailbox_depth: usize,
        custom: Option<serde_json::Value>,
    ) -> HealthReport {
        let uptime = self.started.elapsed();
        let idle = match self.last_activity_ms.load(Ordering::Relaxed) {
            NEVER => uptime,
            ms => uptime.saturating_sub(Duration::from_millis(ms)),
        };
        let last_error_age = match self.last_error_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => Some(uptime.saturating_sub(Duration::from_millis(ms))),
        };
        HealthReport {
            id: id.to_string(),
            status: derive_status(
                mailbox_depth,
                self.mailbox_capacity,
                last_error_age,
                idle,
                uptime,
            ),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            mailbox_depth,
            mailbox_capacity: self.mailbox_capacity,
            uptime,
            idle,
            custom,
        }
    }
}

/// Derive a status from the three unhealthy conditions: mailbox pressure,
/// a recent error, prolonged idleness.  None → healthy, one or two →
/// degraded, all three → unhealthy.
pub fn derive_status(
    mailbox_depth: usize,
    mailbox_capacity: usize,
    last_error_age: Option<Duration>,
    idle: Duration,
    uptime: Duration,
) -> HealthStatus {
    let mut conditions = 0;
    if mailbox_capacity > 0 && mailbox_depth as f64 > MAILBOX_PRESSURE * mailbox_capacity as f64 {
        conditions += 1;
    }
    if last_error_age.is_some_and(|age| age < RECENT_ERROR_WINDOW) {
        conditions += 1;
    }
    if uptime >= IDLE_MIN_UPTIME && idle > IDLE_LIMIT {
        conditions += 1;
    }
    match conditions {
        0 => HealthStatus::Healthy,
        1 | 2 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
