// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::health::{HealthProbe, HealthReport, HealthStatus};

/// Aggregated health for everything the supervisor watches.
#[derive(Debug, Clone)]
pub struct SystemHealth {
    /// Worst-case over all actors.
    pub status: HealthStatus,
    pub actors: Vec<HealthReport>,
    pub polled_at: DateTime<Utc>,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            actors: Vec::new(),
            polled_at: Utc::now(),
        }
    }
}

/// Polls registered probes at a fixed interval and keeps the latest
/// aggregate.  The supervisor observes — it never kills an actor; recovery
/// from transient errors is each actor's own job.
pub struct Supervisor {
    probes: Mutex<Vec<Arc<dyn HealthProbe>>>,
    interval: Duration,
    latest: RwLock<SystemHealth>,
}

impl Supervisor {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            probes: Mutex::new(Vec::new()),
            interval,
            latest: RwLock::new(SystemHealth::default()),
        })
    }

    pub fn register(&self, probe: Arc<dyn HealthProbe>) {
        self.probes.lock().unwrap().push(probe);
    }

    /// Collect reports now and store the aggregate.
    pub fn poll(&self) -> SystemHealth {
        let probes = self.probes.lock().unwrap().clone();
        let actors: Vec<HealthReport> = probes.iter().map(|p| p.report()).collect();
        let status = actors
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        for r in &actors {
            if r.status != HealthStatus::Healthy {
                warn!(
                    actor = %r.id,
                    status = ?r.status,
                    errors = r.errors_total,
                    mailbox = r.mailbox_depth,
                    "actor health below healthy"
                );
            }
        }
        let health = SystemHealth {
            status,
            actors,
            polled_at: Utc::now(),
        };
        *self.latest.write().unwrap() = health.clone();
        health
    }

    /// The most recent aggregate (without polling).
    pub fn latest(&self) -> SystemHealth {
        self.latest.read().unwrap().clone()
    }

    /// Run the polling loop until the task is aborted.
    pub fn spawn_polling(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sup.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let health = sup.poll();
                debug!(status = ?health.status, actors = health.actors.len(), "health poll");
            }
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        id: String,
        status: HealthStatus,
    }

    impl HealthProbe for FixedProbe {
        fn id(&self) -> &str {
            &self.id
        }
        fn report(&self) -> HealthReport {
            HealthReport {
                id: self.id.clone(),
                status: self.status,
                errors_total: 0,
                mailbox_depth: 0,
                mailbox_capacity: 8,
                uptime: Duration::ZERO,
                idle: Duration::ZERO,
                custom: None,
            }
        }
    }

    #[tokio::test]
    async fn empty_supervisor_is_healthy() {
        let sup = Supervisor::new(Duration::from_secs(30));
        assert_eq!(sup.poll().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn worst_case_wins() {
        let sup = Supervisor::new(Duration::from_secs(30));
        sup.register(Arc::new(FixedProbe {
            id: "a".into(),
            status: HealthStatus::Healthy,
        }));
        sup.register(Arc::new(FixedProbe {
            id: "b".into(),
            status: HealthStatus::Degraded,
        }));
        sup.register(Arc::new(FixedProbe {
            id: "c".into(),
            status: HealthStatus::Healthy,
        }));
        let health = sup.poll();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.actors.len(), 3);
    }

    #[tokio::test]
    async fn latest_returns_last_poll() {
        let sup = Supervisor::new(Duration::from_secs(30));
        sup.register(Arc::new(FixedProbe {
            id: "u".into(),
            status: HealthStatus::Unhealthy,
        }));
        sup.poll();
        assert_eq!(sup.latest().status, HealthStatus::Unhealthy);
    }
}
