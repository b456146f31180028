use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use relaycore_events::{Event, EventBus, EventKind};
use relaycore_queue::{NewMessage, NewResponse, QueueError, QueueStore};

use crate::aggregate::{apply_long_response_handling, aggregate_responses, promote_send_files, strip_residual_mentions};
use crate::conversation::{Conversation, OriginalMessageData, TeamContext};

/// Idle timeout after which a conversation is force-completed with whatever
/// responses it has (spec.md §5).
pub const CONVERSATION_IDLE_TIMEOUT_MINUTES: i64 = 30;

/// Internal-message marker telling the receiving agent who handed it the
/// work, or which pipeline step it's continuing (spec.md §4.5).
fn wrap_internal_body(from_agent: &str, body: &str, pipeline_step: Option<usize>) -> String {
    match pipeline_step {
        Some(step) => format!("[Pipeline step {step}, handed off from @{from_agent}]:\n{body}"),
        None => format!("[Message from teammate @{from_agent}]:\n{body}"),
    }
}

/// Owns the live set of in-memory Conversations and exposes the per-id
/// exclusive-section operations from spec.md §4.5. Callers obtain the
/// conversation's own lock via `get`/`ensure`/`start` and hold it across the
/// whole `record -> pipeline-filter -> enqueue -> completeBranch [-> complete]`
/// sequence, per spec.md §5's per-conversation critical section.
pub struct ConversationManager {
    queue: Arc<dyn QueueStore>,
    events: EventBus,
    conversations: Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl ConversationManager {
    pub fn new(queue: Arc<dyn QueueStore>, events: EventBus) -> Self {
        Self {
            queue,
            events,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(
        &self,
        team_context: TeamContext,
        data: OriginalMessageData,
        max_messages: u32,
    ) -> Arc<Mutex<Conversation>> {
        let conv = Conversation::start(team_context.clone(), data, max_messages, Utc::now());
        let id = conv.id.clone();
        let handle = Arc::new(Mutex::new(conv));
        self.conversations.lock().await.insert(id.clone(), Arc::clone(&handle));
        self.events.publish(Event::new(EventKind::TeamChainStart {
            conversation_id: id,
            team_id: team_context.team_id,
        }));
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.lock().await.get(id).cloned()
    }

    /// Fetch the conversation `id` if it's already live, or create it with
    /// that exact id and `pending = 1` (spec.md §4.6 step 9: "ensure a
    /// conversation exists"). Used when an internal message's conversation
    /// has outlived a process restart.
    pub async fn ensure_with_id(
        &self,
        id: &str,
        team_context: TeamContext,
        data: OriginalMessageData,
        max_messages: u32,
    ) -> Arc<Mutex<Conversation>> {
        let mut map = self.conversations.lock().await;
        if let Some(existing) = map.get(id) {
            return Arc::clone(existing);
        }
        let mut conv = Conversation::start(team_context, data, max_messages, Utc::now());
        conv.id = id.to_string();
        let handle = Arc::new(Mutex::new(conv));
        map.insert(id.to_string(), Arc::clone(&handle));
        handle
    }

    pub async fn remove(&self, id: &str) {
        self.conversations.lock().await.remove(id);
    }

    pub async fn ids(&self) -> Vec<String> {
        self.conversations.lock().await.keys().cloned().collect()
    }

    pub async fn pending_responses(&self, channel: &str) -> Result<Vec<relaycore_queue::Response>, QueueError> {
        self.queue.pending_responses_for_channel(channel).await
    }

    /// Append a completed branch's response and mark its agent done
    /// (spec.md §4.5 `recordStep`).
    pub fn record_step(&self, conv: &mut Conversation, agent_id: &str, response_text: &str) {
        conv.responses.push((agent_id.to_string(), response_text.to_string()));
        conv.total_messages += 1;
        conv.completed_agents.insert(agent_id.to_string());
    }

    /// Enqueue one internal message per mention, incrementing `pending`
    /// accordingly (spec.md §4.5 `enqueueMentions`). Mentions are dropped
    /// with a warning once `totalMessages >= maxMessages`.
    pub async fn enqueue_mentions(
        &self,
        conv: &mut Conversation,
        current_agent_id: &str,
        mentions: Vec<(String, String)>,
    ) -> Result<(), QueueError> {
        if mentions.is_empty() {
            return Ok(());
        }
        if conv.total_messages >= conv.max_messages {
            tracing::warn!(
                conversation_id = %conv.id,
                total_messages = conv.total_messages,
                "dropping mentions: maxMessages reached"
            );
            return Ok(());
        }

        let pipeline_step = conv
            .team_context
            .pipeline
            .as_ref()
            .filter(|p| p.strict)
            .map(|_| conv.pipeline_step);

        for (target, body) in mentions {
            let wrapped = wrap_internal_body(current_agent_id, &body, pipeline_step);
            let external_id = uuid::Uuid::new_v4().to_string();
            self.queue
                .enqueue_message(NewMessage {
                    external_id: external_id.clone(),
                    channel: conv.channel.clone(),
                    sender: conv.sender.clone(),
                    sender_address: conv.sender_address.clone(),
                    body: wrapped.clone(),
                    files: None,
                    agent: Some(target.clone()),
                    conversation_id: Some(conv.id.clone()),
                    from_agent: Some(current_agent_id.to_string()),
                })
                .await?;
            conv.pending += 1;
            self.events.publish(Event::new(EventKind::MessageEnqueued {
                message_id: external_id,
                agent_id: Some(target.clone()),
            }));
            conv.outgoing_mentions.insert(target.clone(), wrapped);
            self.events.publish(Event::new(EventKind::ChainHandoff {
                from_agent_id: current_agent_id.to_string(),
                to_agent_id: target,
                team_id: conv.team_context.team_id.clone(),
            }));
        }
        Ok(())
    }

    /// `pending -= 1`, clamped at zero; returns true iff the conversation has
    /// no outstanding branches left (spec.md §4.5 `completeBranch`).
    pub fn complete_branch(&self, conv: &mut Conversation) -> bool {
        match conv.pending.checked_sub(1) {
            Some(v) => {
                conv.pending = v;
                v == 0
            }
            None => {
                conv.pending = 0;
                true
            }
        }
    }

    /// Aggregate, finalize, and emit the conversation's single outbound
    /// response, then mark it completed. Idempotent (spec.md §4.5
    /// `complete`): a second call is a no-op.
    pub async fn complete(&self, conv: &mut Conversation, output_dir: &Path) -> Result<(), QueueError> {
        if conv.completed {
            return Ok(());
        }

        let aggregated = aggregate_responses(&conv.responses);
        let stripped = strip_residual_mentions(&aggregated);
        let (with_files_stripped, mut files) = promote_send_files(&stripped);
        files.extend(conv.files.iter().cloned());

        let fallback_body = with_files_stripped.clone();
        let (body, saved_file) = apply_long_response_handling(with_files_stripped, output_dir, &conv.id)
            .unwrap_or_else(|err| {
                tracing::warn!(conversation_id = %conv.id, error = %err, "failed to persist long response");
                (fallback_body, None)
            });
        if let Some(path) = saved_file {
            files.push(path);
        }

        self.queue
            .enqueue_response(NewResponse {
                message_id: conv.message_id.clone(),
                channel: conv.channel.clone(),
                sender: conv.sender.clone(),
                sender_address: conv.sender_address.clone(),
                body: body.clone(),
                original_message: conv.original_message.clone(),
                from_agent: None,
                files: if files.is_empty() { None } else { Some(files) },
            })
            .await?;

        conv.completed = true;
        self.events.publish(Event::new(EventKind::ResponseReady {
            message_id: conv.message_id.clone(),
            response_text: body,
        }));
        self.events.publish(Event::new(EventKind::TeamChainEnd {
            conversation_id: conv.id.clone(),
            team_id: conv.team_context.team_id.clone(),
            total: conv.total_messages,
        }));
        Ok(())
    }

    /// Force-complete every conversation whose `startTime` is older than
    /// `max_age`, and drop it from the live set (spec.md §5, the 30-minute
    /// idle sweep).
    pub async fn sweep_idle(&self, max_age: chrono::Duration, output_dir: &Path) -> usize {
        let now = Utc::now();
        let candidates: Vec<(String, Arc<Mutex<Conversation>>)> = {
            let map = self.conversations.lock().await;
            map.iter()
                .filter(|(_, handle)| {
                    // best-effort non-blocking peek; exact check happens under lock below
                    handle.try_lock().map(|c| c.is_idle(now, max_age)).unwrap_or(false)
                })
                .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
                .collect()
        };

        let mut swept = 0;
        for (id, handle) in candidates {
            let mut conv = handle.lock().await;
            if conv.is_idle(now, max_age) && !conv.completed {
                if self.complete(&mut conv, output_dir).await.is_ok() {
                    swept += 1;
                }
            }
        }
        self.prune_completed().await;
        swept
    }

    async fn prune_completed(&self) {
        let mut map = self.conversations.lock().await;
        let mut to_remove = Vec::new();
        for (id, handle) in map.iter() {
            if let Ok(conv) = handle.try_lock() {
                if conv.completed {
                    to_remove.push(id.clone());
                }
            }
        }
        for id in to_remove {
            map.remove(&id);
        }
    }
}
