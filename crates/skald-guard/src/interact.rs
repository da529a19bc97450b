// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Mode-agnostic user-interaction actor.
//!
//! The orchestrator, the authorization actor, and the planner all need a
//! way to ask the human something — approve a command, answer a planning
//! question, fill in an input.  They send typed requests here; a
//! mode-specific [`InteractionHandler`] (CLI prompt, daemon socket
//! round-trip) does the actual asking.  Requests run concurrently on child
//! tasks so one slow dialog does not block the next; each is bounded by a
//! timeout, and a stopped actor answers everything `cancelled`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::debug;

use skald_actor::{Actor, ActorContext, ActorRef, SpawnOptions};

/// Default ceiling for a single interaction round-trip.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Authorization,
    PlanningQuestion,
    SingleInput,
    MultiInput,
}

/// One request for the human.
#[derive(Debug, Clone)]
pub struct InteractionRequest {
    pub id: String,
    pub kind: InteractionKind,
    /// Kind-specific payload (question text, fingerprint, suggested prefix…).
    pub payload: serde_json::Value,
    /// Per-request override of the default timeout.
    pub timeout: Option<Duration>,
    /// Frontend tab the request belongs to, when the frontend has tabs.
    pub tab_id: Option<String>,
}

impl InteractionRequest {
    pub fn new(kind: InteractionKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            timeout: None,
            tab_id: None,
        }
    }
}

/// The single tagged response union for every interaction kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionResponse {
    /// Authorization verdict.
    pub approved: Option<bool>,
    /// Single-answer payload.
    pub answer: Option<String>,
    /// Multi-answer payload (question id → answer).
    pub answers: Option<BTreeMap<String, String>>,
    /// The frontend displayed the request.
    pub acknowledged: bool,
    pub cancelled: bool,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl InteractionResponse {
    pub fn approved(yes: bool) -> Self {
        Self {
            approved: Some(yes),
            acknowledged: true,
            ..Self::default()
        }
    }

    pub fn answered(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            acknowledged: true,
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn error(e: impl std::fmt::Display) -> Self {
        Self {
            error: Some(e.to_string()),
            ..Self::default()
        }
    }
}

/// Satisfies interaction requests in one concrete frontend mode.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle(&self, req: &InteractionRequest) -> anyhow::Result<InteractionResponse>;
}

pub enum InteractMsg {
    Ask {
        req: InteractionRequest,
        reply: oneshot::Sender<InteractionResponse>,
    },
}

/// Counters exposed through the actor's custom health metrics.
#[derive(Clone, Default)]
pub struct InteractionMetrics {
    requests_total: Arc<AtomicU64>,
    timeouts_total: Arc<AtomicU64>,
    pending: Arc<AtomicU64>,
}

impl InteractionMetrics {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }
    pub fn timeouts_total(&self) -> u64 {
        self.timeouts_total.load(Ordering::Relaxed)
    }
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests_total": self.requests_total(),
            "timeouts_total": self.timeouts_total(),
            "pending": self.pending(),
        })
    }
}

pub struct InteractionActor {
    handler: Arc<dyn InteractionHandler>,
    default_timeout: Duration,
    shutdown: watch::Sender<bool>,
    metrics: InteractionMetrics,
}

impl InteractionActor {
    pub fn new(handler: Arc<dyn InteractionHandler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            handler,
            default_timeout: DEFAULT_TIMEOUT,
            shutdown,
            metrics: InteractionMetrics::default(),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[async_trait]
impl Actor for InteractionActor {
    type Msg = InteractMsg;

    async fn receive(
        &mut self,
        _ctx: &ActorContext<InteractMsg>,
        msg: InteractMsg,
    ) -> anyhow::Result<()> {
        let InteractMsg::Ask { req, reply } = msg;
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.pending.fetch_add(1, Ordering::Relaxed);

        let handler = Arc::clone(&self.handler);
        let timeout = req.timeout.unwrap_or(self.default_timeout);
        let mut shutdown = self.shutdown.subscribe();
        let metrics = self.metrics.clone();
        // Each round-trip runs on its own task so a slow dialog does not
        // serialize behind another.  The caller dropping its reply receiver
        // is the request-context cancellation: the send below just fails.
        tokio::spawn(async move {
            debug!(id = %req.id, kind = ?req.kind, "interaction request");
            let response = tokio::select! {
                r = handler.handle(&req) => match r {
                    Ok(resp) => resp,
                    Err(e) => InteractionResponse::error(e),
                },
                _ = tokio::time::sleep(timeout) => {
                    metrics.timeouts_total.fetch_add(1, Ordering::Relaxed);
                    InteractionResponse::timed_out()
                }
                _ = shutdown.changed() => InteractionResponse::cancelled(),
            };
            metrics.pending.fetch_sub(1, Ordering::Relaxed);
            let _ = reply.send(response);
        });
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ActorContext<InteractMsg>) -> anyhow::Result<()> {
        // Every in-flight round-trip resolves to `cancelled`.
        let _ = self.shutdown.send(true);
        Ok(())
    }

    fn on_undelivered(&mut self, msg: InteractMsg) {
        let InteractMsg::Ask { reply, .. } = msg;
        let _ = reply.send(InteractionResponse::cancelled());
    }
}

/// Clone-able client for the interaction actor.
#[derive(Clone)]
pub struct Interactions {
    actor: ActorRef<InteractMsg>,
    metrics: InteractionMetrics,
}

impl Interactions {
    pub async fn ask(&self, req: InteractionRequest) -> InteractionResponse {
        let (reply, rx) = oneshot::channel();
        if self.actor.send(InteractMsg::Ask { req, reply }).is_err() {
            return InteractionResponse::cancelled();
        }
        rx.await.unwrap_or_else(|_| InteractionResponse::cancelled())
    }

    pub fn metrics(&self) -> &InteractionMetrics {
        &self.metrics
    }

    pub fn actor(&self) -> &ActorRef<InteractMsg> {
        &self.actor
    }

    pub async fn stop(&self, deadline: Duration) {
        let _ = self.actor.stop(deadline).await;
    }
}

/// Spawn the interaction actor with its metrics wired into health reporting.
pub fn spawn_interactions(handler: Arc<dyn InteractionHandler>) -> Interactions {
    let actor = InteractionActor::new(handler);
    let metrics = actor.metrics.clone();
    let metrics_probe = metrics.clone();
    let options = SpawnOptions {
        sequential: false,
        custom_metrics: Some(Arc::new(move || metrics_probe.as_json())),
    };
    let actor = skald_actor::spawn("interactions", actor, 64, options);
    Interactions { actor, metrics }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct ApproveAll;

    #[async_trait]
    impl InteractionHandler for ApproveAll {
        async fn handle(&self, _req: &InteractionRequest) -> anyhow::Result<InteractionResponse> {
            Ok(InteractionResponse::approved(true))
        }
    }

    struct NeverAnswers;

    #[async_trait]
    impl InteractionHandler for NeverAnswers {
        async fn handle(&self, _req: &InteractionRequest) -> anyhow::Result<InteractionResponse> {
            std::future::pending().await
        }
    }

    fn req() -> InteractionRequest {
        InteractionRequest::new(InteractionKind::Authorization, serde_json::json!({}))
    }

    #[tokio::test]
    async fn handler_response_is_forwarded() {
        let ix = spawn_interactions(Arc::new(ApproveAll));
        let resp = ix.ask(req()).await;
        assert_eq!(resp.approved, Some(true));
        assert!(resp.acknowledged);
        assert_eq!(ix.metrics().requests_total(), 1);
        assert_eq!(ix.metrics().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let ix = spawn_interactions(Arc::new(NeverAnswers));
        let mut request = req();
        request.timeout = Some(Duration::from_secs(1));
        let resp = ix.ask(request).await;
        assert!(resp.timed_out);
        assert_eq!(ix.metrics().timeouts_total(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_pending_requests() {
        let ix = spawn_interactions(Arc::new(NeverAnswers));
        let pending = {
            let ix = ix.clone();
            tokio::spawn(async move { ix.ask(req()).await })
        };
        // Let the request reach the handler before stopping.
        tokio::time::sleep(Duration::from_millis(20)).await;
        ix.stop(Duration::from_secs(1)).await;
        let resp = pending.await.unwrap();
        assert!(resp.cancelled);
    }

    #[tokio::test]
    async fn requests_do_not_serialize_behind_each_other() {
        struct SecondFast;
        #[async_trait]
        impl InteractionHandler for SecondFast {
            async fn handle(
                &self,
                req: &InteractionRequest,
            ) -> anyhow::Result<InteractionResponse> {
                if req.payload["slow"] == true {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(InteractionResponse::answered(req.payload["n"].to_string()))
            }
        }
        let ix = spawn_interactions(Arc::new(SecondFast));
        let slow = {
            let ix = ix.clone();
            tokio::spawn(async move {
                ix.ask(InteractionRequest::new(
                    InteractionKind::SingleInput,
                    serde_json::json!({"slow": true, "n": 1}),
                ))
                .await
            })
        };
        let fast = ix
            .ask(InteractionRequest::new(
                InteractionKind::SingleInput,
                serde_json::json!({"slow": false, "n": 2}),
            ))
            .await;
        assert_eq!(fast.answer.as_deref(), Some("2"));
        let slow = slow.await.unwrap();
        assert_eq!(slow.answer.as_deref(), Some("1"));
    }

    #[test]
    fn response_union_serializes_both_shapes() {
        let single = InteractionResponse::answered("yes");
        let mut multi = InteractionResponse::default();
        multi.answers = Some(
            [("q1".to_string(), "a1".to_string())]
                .into_iter()
                .collect(),
        );
        let s = serde_json::to_string(&single).unwrap();
        let m = serde_json::to_string(&multi).unwrap();
        let s_back: InteractionResponse = serde_json::from_str(&s).unwrap();
        let m_back: InteractionResponse = serde_json::from_str(&m).unwrap();
        assert_eq!(s_back, single);
        assert_eq!(m_back, multi);
    }
}
