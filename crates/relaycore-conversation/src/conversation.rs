use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use relaycore_config::PipelineConfig;

/// Team context a conversation is running under: which team, and (if any)
/// its pipeline configuration, captured at conversation start so later
/// config reloads can't change an in-flight conversation's rules out from
/// under it (spec.md §3: "Config Provider owns snapshots; all other
/// components consume snapshots by value").
#[derive(Debug, Clone)]
pub struct TeamContext {
    pub team_id: String,
    pub pipeline: Option<PipelineConfig>,
}

/// Everything needed to address the conversation's eventual aggregated
/// reply back to its originating transport (spec.md §3).
#[derive(Debug, Clone)]
pub struct OriginalMessageData {
    pub channel: String,
    pub sender: String,
    pub sender_address: Option<String>,
    pub message_id: String,
    pub original_message: String,
}

/// Live, in-memory state of a multi-agent team conversation (spec.md §3).
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub channel: String,
    pub sender: String,
    pub sender_address: Option<String>,
    pub message_id: String,
    pub original_message: String,
    pub pending: u32,
    /// Ordered `(agentId, text)` pairs, in step-completion order.
    pub responses: Vec<(String, String)>,
    pub files: HashSet<String>,
    pub total_messages: u32,
    pub max_messages: u32,
    pub team_context: TeamContext,
    pub start_time: DateTime<Utc>,
    /// Target agent id -> last outgoing mention body sent to it.
    pub outgoing_mentions: HashMap<String, String>,
    pub completed: bool,
    pub pipeline_step: usize,
    pub completed_agents: HashSet<String>,
    pub pipeline_loops: u32,
}

impl Conversation {
    pub fn start(team_context: TeamContext, data: OriginalMessageData, max_messages: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: data.channel,
            sender: data.sender,
            sender_address: data.sender_address,
            message_id: data.message_id,
            original_message: data.original_message,
            pending: 1,
            responses: Vec::new(),
            files: HashSet::new(),
            total_messages: 0,
            max_messages,
            team_context,
            start_time: now,
            outgoing_mentions: HashMap::new(),
            completed: false,
            pipeline_step: 0,
            completed_agents: HashSet::new(),
            pipeline_loops: 0,
        }
    }

    pub fn is_idle(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.start_time) > max_age
    }
}
