// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::health::{HealthProbe, HealthReport, HealthState};

/// Trait implemented by every actor.
///
/// Messages are processed strictly serially by a dedicated worker task.
/// A `receive` error is logged and counted against the actor's health but
/// does not kill the actor: the supervisor never terminates actors for
/// transient errors.
#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    /// Called once before the first message.
    async fn start(&mut self, _ctx: &ActorContext<Self::Msg>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle one message.
    async fn receive(&mut self, ctx: &ActorContext<Self::Msg>, msg: Self::Msg)
        -> anyhow::Result<()>;

    /// Called once after the mailbox has been drained, before the worker
    /// task exits.
    async fn stop(&mut self, _ctx: &ActorContext<Self::Msg>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every message still queued when the actor stops.  Actors
    /// whose messages carry reply channels answer them `cancelled` here.
    fn on_undelivered(&mut self, _msg: Self::Msg) {}
}

/// Options for [`spawn`].
#[derive(Default, Clone)]
pub struct SpawnOptions {
    /// When set, `deliver` parks the sender until `receive` has completed
    /// for the message, so ordering between producer and consumer is
    /// observable.
    pub sequential: bool,
    /// Extra metrics merged into this actor's health report.
    pub custom_metrics: Option<Arc<dyn Fn() -> serde_json::Value + Send + Sync>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    /// The bounded mailbox is full; the message was dropped.  The sender
    /// decides whether to retry, surface, or fail.
    #[error("mailbox full")]
    MailboxFull,
    /// The actor has stopped; no further messages are accepted.
    #[error("actor stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StopError {
    #[error("actor did not stop within the deadline")]
    Timeout,
}

struct Envelope<M> {
    msg: M,
    /// Present for sequential delivery: resolved after `receive` returned.
    ack: Option<oneshot::Sender<()>>,
}

struct StopShared {
    signal: watch::Sender<bool>,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Handle to a running actor.
pub struct ActorRef<M> {
    id: String,
    tx: mpsc::Sender<Envelope<M>>,
    health: Arc<HealthState>,
    options: SpawnOptions,
    stop: Arc<StopShared>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tx: self.tx.clone(),
            health: Arc::clone(&self.health),
            options: self.options.clone(),
            stop: Arc::clone(&self.stop),
        }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking send.  Fails with `MailboxFull` when the bounded queue
    /// is at capacity and `Stopped` once the actor shut down.
    pub fn send(&self, msg: M) -> Result<(), SendError> {
        match self.tx.try_send(Envelope { msg, ack: None }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::MailboxFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Stopped),
        }
    }

    /// Sequential send: waits for mailbox space, then for the actor's
    /// `receive` of this message to complete.
    pub async fn send_seq(&self, msg: M) -> Result<(), SendError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                msg,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| SendError::Stopped)?;
        // The ack sender is dropped unresolved when the message is drained
        // at stop time, which surfaces here as Stopped.
        ack_rx.await.map_err(|_| SendError::Stopped)
    }

    /// Send using the discipline chosen at spawn time.
    pub async fn deliver(&self, msg: M) -> Result<(), SendError> {
        if self.options.sequential {
            self.send_seq(msg).await
        } else {
            self.send(msg)
        }
    }

    /// Signal the actor to stop and wait up to `deadline` for the worker to
    /// drain the mailbox (answering queued messages via `on_undelivered`)
    /// and run `Actor::stop`.
    pub async fn stop(&self, deadline: Duration) -> Result<(), StopError> {
        let _ = self.stop.signal.send(true);
        let done = self.stop.done.lock().unwrap().take();
        match done {
            Some(rx) => match tokio::time::timeout(deadline, rx).await {
                Ok(_) => Ok(()),
                Err(_) => Err(StopError::Timeout),
            },
            // A concurrent stop() already consumed the receiver; the signal
            // above is idempotent.
            None => Ok(()),
        }
    }

    /// Current mailbox depth (queued, not yet received).
    pub fn mailbox_depth(&self) -> usize {
        self.health.mailbox_capacity() - self.tx.capacity()
    }
}

impl<M: Send + 'static> HealthProbe for ActorRef<M> {
    fn id(&self) -> &str {
        &self.id
    }

    fn report(&self) -> HealthReport {
        self.health.report(
            &self.id,
            self.mailbox_depth(),
            self.options.custom_metrics.as_deref().map(|f| f()),
        )
    }
}

/// Context handed to every actor callback.
pub struct ActorContext<M> {
    id: String,
    tx: mpsc::Sender<Envelope<M>>,
    health: Arc<HealthState>,
    options: SpawnOptions,
    stop: Arc<StopShared>,
}

impl<M: Send + 'static> ActorContext<M> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A ref to this actor itself, for handlers that resolve asynchronous
    /// work by sending follow-up messages to their own mailbox.
    pub fn self_ref(&self) -> ActorRef<M> {
        ActorRef {
            id: self.id.clone(),
            tx: self.tx.clone(),
            health: Arc::clone(&self.health),
            options: self.options.clone(),
            stop: Arc::clone(&self.stop),
        }
    }
}

/// Spawn an actor with a bounded mailbox and return its handle.
pub fn spawn<A: Actor>(
    id: impl Into<String>,
    mut actor: A,
    mailbox_size: usize,
    options: SpawnOptions,
) -> ActorRef<A::Msg> {
    let id = id.into();
    let capacity = mailbox_size.max(1);
    let (tx, mut rx) = mpsc::channel::<Envelope<A::Msg>>(capacity);
    let (signal, mut stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = oneshot::channel();
    let health = Arc::new(HealthState::new(capacity));
    let stop = Arc::new(StopShared {
        signal,
        done: Mutex::new(Some(done_rx)),
    });

    let ctx = ActorContext {
        id: id.clone(),
        tx: tx.clone(),
        health: Arc::clone(&health),
        options: options.clone(),
        stop: Arc::clone(&stop),
    };

    let worker_health = Arc::clone(&health);
    tokio::spawn(async move {
        debug!(actor = %ctx.id, "actor started");
        if let Err(e) = actor.start(&ctx).await {
            worker_health.record_error();
            warn!(actor = %ctx.id, "actor start error: {e}");
        }
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                maybe = rx.recv() => match maybe {
                    Some(env) => {
                        worker_health.record_activity();
                        let result = actor.receive(&ctx, env.msg).await;
                        if let Some(ack) = env.ack {
                            let _ = ack.send(());
                        }
                        if let Err(e) = result {
                            worker_health.record_error();
                            warn!(actor = %ctx.id, "receive error: {e}");
                        }
                    }
                    None => break,
                }
            }
        }
        // Drain: no further receive runs; queued messages get the
        // undelivered hook so pending replies can be answered cancelled.
        rx.close();
        while let Some(env) = rx.recv().await {
            // Dropping the ack unresolved fails the sequential sender.
            drop(env.ack);
            actor.on_undelivered(env.msg);
        }
        if let Err(e) = actor.stop(&ctx).await {
            warn!(actor = %ctx.id, "actor stop error: {e}");
        }
        debug!(actor = %ctx.id, "actor stopped");
        let _ = done_tx.send(());
    });

    ActorRef {
        id,
        tx,
        health,
        options,
        stop,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    struct Echo {
        seen: Arc<Mutex<Vec<String>>>,
        undelivered: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actor for Echo {
        type Msg = String;

        async fn receive(
            &mut self,
            _ctx: &ActorContext<String>,
            msg: String,
        ) -> anyhow::Result<()> {
            if msg == "boom" {
                anyhow::bail!("simulated failure");
            }
            self.seen.lock().unwrap().push(msg);
            Ok(())
        }

        fn on_undelivered(&mut self, _msg: String) {
            self.undelivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo() -> (Echo, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let undelivered = Arc::new(AtomicUsize::new(0));
        (
            Echo {
                seen: Arc::clone(&seen),
                undelivered: Arc::clone(&undelivered),
            },
            seen,
            undelivered,
        )
    }

    #[tokio::test]
    async fn processes_messages_in_order() {
        let (actor, seen, _) = echo();
        let r = spawn("echo", actor, 8, SpawnOptions::default());
        for i in 0..5 {
            r.send_seq(format!("m{i}")).await.unwrap();
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["m0", "m1", "m2", "m3", "m4"]
        );
    }

    #[tokio::test]
    async fn send_seq_returns_after_receive_completed() {
        let (actor, seen, _) = echo();
        let r = spawn("echo", actor, 1, SpawnOptions::default());
        r.send_seq("one".to_string()).await.unwrap();
        // Already visible without any further synchronisation.
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn receive_error_does_not_kill_the_actor() {
        let (actor, seen, _) = echo();
        let r = spawn("echo", actor, 8, SpawnOptions::default());
        r.send_seq("boom".to_string()).await.unwrap();
        r.send_seq("after".to_string()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["after"]);
        assert_eq!(r.report().errors_total, 1);
    }

    #[tokio::test]
    async fn full_mailbox_drops_with_error() {
        // Actor that blocks forever on a gate so the mailbox can fill up.
        struct Stuck {
            gate: Option<oneshot::Receiver<()>>,
        }
        #[async_trait]
        impl Actor for Stuck {
            type Msg = ();
            async fn receive(&mut self, _ctx: &ActorContext<()>, _m: ()) -> anyhow::Result<()> {
                if let Some(gate) = self.gate.take() {
                    let _ = gate.await;
                }
                Ok(())
            }
        }
        let (_gate_tx, gate_rx) = oneshot::channel();
        let r = spawn("stuck", Stuck { gate: Some(gate_rx) }, 1, SpawnOptions::default());
        // First message occupies the worker, second fills the single slot.
        r.send(()).unwrap();
        tokio::task::yield_now().await;
        r.send(()).unwrap();
        // Third must be dropped.
        let mut dropped = false;
        for _ in 0..10 {
            match r.send(()) {
                Err(SendError::MailboxFull) => {
                    dropped = true;
                    break;
                }
                Ok(()) => tokio::task::yield_now().await,
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert!(dropped);
    }

    #[tokio::test]
    async fn stop_drains_undelivered_messages() {
        let (actor, seen, undelivered) = echo();
        let r = spawn("echo", actor, 8, SpawnOptions::default());
        // On a current-thread runtime the worker has not run yet: everything
        // queued before the first await is still in the mailbox when the
        // stop signal lands, so the biased select breaks before any receive.
        for i in 0..4 {
            r.send(format!("q{i}")).unwrap();
        }
        r.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(undelivered.load(Ordering::SeqCst), 4);
        assert!(seen.lock().unwrap().is_empty());
        // After stop, sends fail.
        assert_eq!(r.send("late".into()), Err(SendError::Stopped));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (actor, _, _) = echo();
        let r = spawn("echo", actor, 4, SpawnOptions::default());
        r.stop(Duration::from_secs(1)).await.unwrap();
        r.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn self_ref_can_send_follow_ups() {
        struct Chain {
            seen: Arc<Mutex<Vec<u32>>>,
        }
        #[async_trait]
        impl Actor for Chain {
            type Msg = u32;
            async fn receive(&mut self, ctx: &ActorContext<u32>, msg: u32) -> anyhow::Result<()> {
                self.seen.lock().unwrap().push(msg);
                if msg == 1 {
                    let me = ctx.self_ref();
                    tokio::spawn(async move {
                        let _ = me.send(2);
                    });
                }
                Ok(())
            }
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let r = spawn("chain", Chain { seen: Arc::clone(&seen) }, 4, SpawnOptions::default());
        r.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
