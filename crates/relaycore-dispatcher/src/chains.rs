use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};

/// Per-agent FIFO chains (spec.md §4.6/§5): a conceptual serial queue per
/// agent id. New message processing appends; the prior task must settle
/// (success or failure) before the next begins. Distinct agent ids run
/// fully concurrently. Implemented as one `tokio::task` per agent id
/// draining an unbounded channel of boxed futures — a single consumer task
/// per channel gives the single-in-flight guarantee by construction.
#[derive(Default)]
pub struct AgentChains {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<BoxFuture<'static, ()>>>>,
}

impl AgentChains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `task` to `agent_id`'s chain, spawning the chain's worker the
    /// first time an agent is seen.
    pub async fn submit(&self, agent_id: &str, task: BoxFuture<'static, ()>) {
        let mut senders = self.senders.lock().await;
        if let Some(tx) = senders.get(agent_id) {
            if tx.send(task).is_ok() {
                return;
            }
            // Worker died (panicked); fall through and respawn below.
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let _ = tx.send(task);
        senders.insert(agent_id.to_string(), tx);
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            while let Some(fut) = rx.recv().await {
                fut.await;
            }
            tracing::trace!(agent_id = %agent_id, "agent chain drained");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    /// Invariant #4 (spec.md §5): at most one task per agent id is
    /// in-flight at a time.
    #[tokio::test]
    async fn at_most_one_task_per_agent_in_flight() {
        let chains = AgentChains::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            let task: BoxFuture<'static, ()> = Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
            chains.submit("agent-a", task).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }

    /// Tasks submitted for one agent id run in submission order.
    #[tokio::test]
    async fn tasks_for_one_agent_run_in_submission_order() {
        let chains = AgentChains::new();
        let order = Arc::new(TokioMutex::new(Vec::new()));

        for i in 0..10 {
            let order = Arc::clone(&order);
            let task: BoxFuture<'static, ()> = Box::pin(async move {
                order.lock().await.push(i);
            });
            chains.submit("agent-a", task).await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let observed = order.lock().await.clone();
        assert_eq!(observed, (0..10).collect::<Vec<_>>());
    }

    /// Distinct agent ids are fully concurrent with each other.
    #[tokio::test]
    async fn distinct_agents_run_concurrently() {
        let chains = AgentChains::new();
        let started = Arc::new(Mutex::new(Vec::new()));

        for agent in ["agent-a", "agent-b"] {
            let started = Arc::clone(&started);
            let agent = agent.to_string();
            let task: BoxFuture<'static, ()> = Box::pin(async move {
                started.lock().await.push(agent.clone());
                tokio::time::sleep(Duration::from_millis(20)).await;
            });
            chains.submit(&agent, task).await;
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        // Both chains should have already started their one task within 5ms
        // of submission, since they don't serialize against each other.
        assert_eq!(started.lock().await.len(), 2);
    }
}
