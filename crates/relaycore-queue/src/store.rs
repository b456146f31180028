use async_trait::async_trait;

use crate::error::QueueError;
use crate::model::{Message, NewMessage, NewResponse, QueueStats, Response};

/// Maximum number of retries before a message is dead-lettered (spec.md §4.1).
pub const MAX_RETRIES: u32 = 5;

/// Default stale-claim recovery threshold (spec.md §5).
pub const DEFAULT_STALE_THRESHOLD_MS: i64 = 10 * 60 * 1000;

/// Durable persistence of inbound messages and outbound responses; atomic
/// claim; retry/dead-letter bookkeeping; stale recovery (spec.md §4.1, C1).
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue_message(&self, data: NewMessage) -> Result<i64, QueueError>;

    /// Atomically claim the oldest pending message addressed to `agent_id`
    /// (or the oldest pending message with no agent set, when
    /// `agent_id == "default"`), transitioning it to `processing`.
    async fn claim_next_message(&self, agent_id: &str) -> Result<Option<Message>, QueueError>;

    async fn complete_message(&self, id: i64) -> Result<(), QueueError>;

    /// Increment `retry_count`; dead-letter at `MAX_RETRIES`, otherwise
    /// return the row to `pending`.
    async fn fail_message(&self, id: i64, error: &str) -> Result<(), QueueError>;

    /// Immediately dead-letter `id` with `reason`, bypassing the retry
    /// counter (spec.md §7: an unroutable message with no agent available
    /// at all fails permanently rather than being retried).
    async fn dead_letter_message(&self, id: i64, reason: &str) -> Result<(), QueueError>;

    async fn enqueue_response(&self, data: NewResponse) -> Result<i64, QueueError>;

    async fn ack_response(&self, id: i64) -> Result<(), QueueError>;

    /// Reclaim messages stuck in `processing` for longer than `threshold_ms`.
    /// Counts as a retry attempt (spec.md §9 Open Question). Returns the
    /// number of rows touched.
    async fn recover_stale_messages(&self, threshold_ms: i64) -> Result<usize, QueueError>;

    async fn prune_acked_responses(&self, older_than_ms: i64) -> Result<usize, QueueError>;

    async fn prune_completed_messages(&self, older_than_ms: i64) -> Result<usize, QueueError>;

    /// Every distinct agent tag among currently-pending messages, `null`
    /// mapped to `"default"`.
    async fn get_pending_agents(&self) -> Result<Vec<String>, QueueError>;

    async fn pending_responses_for_channel(&self, channel: &str) -> Result<Vec<Response>, QueueError>;

    async fn recent_responses(
        &self,
        agents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Response>, QueueError>;

    /// Recent top-level (non-internal, i.e. `from_agent IS NULL`) messages.
    async fn recent_sent_messages(
        &self,
        agents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Message>, QueueError>;

    async fn queue_stats(&self) -> Result<QueueStats, QueueError>;

    async fn get_message(&self, id: i64) -> Result<Option<Message>, QueueError>;

    async fn dead_messages(&self, limit: usize) -> Result<Vec<Message>, QueueError>;

    /// Manual intervention on a dead-lettered message (spec.md §7).
    async fn delete_message(&self, id: i64) -> Result<(), QueueError>;

    /// Manual retry: return a `dead` message to `pending` with retry_count
    /// reset to zero.
    async fn retry_dead_message(&self, id: i64) -> Result<(), QueueError>;
}
