use std::sync::Arc;
use std::time::Duration;

use relaycore_events::EventKind;
use relaycore_queue::{QueueStore, DEFAULT_STALE_THRESHOLD_MS};

use crate::chains::AgentChains;
use crate::context::DispatcherContext;
use crate::process::process_message;

/// Maintenance cadences (spec.md §4.6).
const STALE_RECOVERY_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CONVERSATION_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Fallback poll so the dispatcher still makes progress if an
/// Event Bus wake-up is ever missed (spec.md §4.6: "event-driven ... with a
/// fallback poll").
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Completed rows/acked responses older than this are eligible for pruning
/// (spec.md §3: "deleted by a periodic pruner after completion age exceeds
/// 24 h").
const PRUNE_AGE_MS: i64 = 24 * 60 * 60 * 1000;

pub struct Dispatcher {
    ctx: Arc<DispatcherContext>,
    chains: AgentChains,
}

impl Dispatcher {
    pub fn new(ctx: Arc<DispatcherContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            chains: AgentChains::new(),
        })
    }

    /// Start the dispatcher: the boot-time stale-claim recovery, the
    /// event-driven wake loop (with fallback poll), and the three periodic
    /// maintenance tasks. Returns immediately; work continues on spawned
    /// tasks for the life of the process.
    pub async fn spawn(self: Arc<Self>) {
        // "On process restart, the boot-time recoverStaleMessages(0) call
        // returns every in-flight row to pending" (spec.md §5).
        if let Err(err) = self.ctx.queue.recover_stale_messages(0).await {
            tracing::warn!(error = %err, "boot-time stale recovery failed");
        }

        self.clone().spawn_wake_loop();
        self.clone().spawn_stale_recovery_loop();
        self.clone().spawn_conversation_sweep_loop();
        self.clone().spawn_pruning_loop();
    }

    fn spawn_wake_loop(self: Arc<Self>) {
        let mut events = self.ctx.events.subscribe();
        let poller = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FALLBACK_POLL_INTERVAL);
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(ev) if matches!(ev.kind, EventKind::MessageEnqueued { .. }) => {
                                poller.wake().await;
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                                poller.wake().await;
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = interval.tick() => {
                        poller.wake().await;
                    }
                }
            }
        });
    }

    fn spawn_stale_recovery_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STALE_RECOVERY_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it, boot already recovered.
            loop {
                interval.tick().await;
                match self.ctx.queue.recover_stale_messages(DEFAULT_STALE_THRESHOLD_MS).await {
                    Ok(n) if n > 0 => tracing::info!(recovered = n, "recovered stale claims"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "stale recovery failed"),
                }
            }
        });
    }

    fn spawn_conversation_sweep_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CONVERSATION_SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let max_age = chrono::Duration::minutes(
                    relaycore_conversation::CONVERSATION_IDLE_TIMEOUT_MINUTES,
                );
                let swept = self
                    .ctx
                    .conversations
                    .sweep_idle(max_age, &self.ctx.output_dir)
                    .await;
                if swept > 0 {
                    tracing::info!(swept, "force-completed idle conversations");
                }
            }
        });
    }

    fn spawn_pruning_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let queue = &self.ctx.queue;
                match queue.prune_completed_messages(PRUNE_AGE_MS).await {
                    Ok(n) => tracing::debug!(pruned = n, "pruned completed messages"),
                    Err(err) => tracing::warn!(error = %err, "prune completed messages failed"),
                }
                match queue.prune_acked_responses(PRUNE_AGE_MS).await {
                    Ok(n) => tracing::debug!(pruned = n, "pruned acked responses"),
                    Err(err) => tracing::warn!(error = %err, "prune acked responses failed"),
                }
            }
        });
    }

    /// Claim one message for every agent with pending work and append its
    /// processing onto that agent's FIFO chain (spec.md §4.6).
    async fn wake(&self) {
        let agents = match self.ctx.queue.get_pending_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list pending agents");
                return;
            }
        };

        for agent_id in agents {
            let msg = match self.ctx.queue.claim_next_message(&agent_id).await {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(agent_id = %agent_id, error = %err, "claim failed");
                    continue;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            let row_id = msg.id;
            let task: futures::future::BoxFuture<'static, ()> = Box::pin(async move {
                if let Err(err) = process_message(Arc::clone(&ctx), msg).await {
                    tracing::warn!(message_id = row_id, error = %err, "processing failed, dead-lettering attempt");
                    if let Err(fail_err) = ctx.queue.fail_message(row_id, &err.to_string()).await {
                        tracing::error!(message_id = row_id, error = %fail_err, "failMessage itself failed");
                    }
                }
            });
            self.chains.submit(&agent_id, task).await;
        }
    }
}
