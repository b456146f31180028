use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message lifecycle state (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => MessageStatus::Processing,
            "completed" => MessageStatus::Completed,
            "dead" => MessageStatus::Dead,
            _ => MessageStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Acked,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Acked => "acked",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "acked" => ResponseStatus::Acked,
            _ => ResponseStatus::Pending,
        }
    }
}

/// A row in the `messages` table (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub external_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_address: Option<String>,
    pub body: String,
    pub files: Option<Vec<String>>,
    /// Target agent id. `None` means routing has not been resolved yet
    /// (the Dispatcher runs `parse_agent_routing` to fill it in).
    pub agent: Option<String>,
    pub conversation_id: Option<String>,
    /// Set on internal messages created by the Conversation Manager to hand
    /// work between agents.
    pub from_agent: Option<String>,
    pub status: MessageStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
}

/// Input to `enqueue_message`.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub external_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_address: Option<String>,
    pub body: String,
    pub files: Option<Vec<String>>,
    pub agent: Option<String>,
    pub conversation_id: Option<String>,
    pub from_agent: Option<String>,
}

/// A row in the `responses` table (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub message_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_address: Option<String>,
    pub body: String,
    pub original_message: String,
    pub from_agent: Option<String>,
    pub files: Option<Vec<String>>,
    pub status: ResponseStatus,
    pub created_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
}

/// Input to `enqueue_response`.
#[derive(Debug, Clone, Default)]
pub struct NewResponse {
    pub message_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_address: Option<String>,
    pub body: String,
    pub original_message: String,
    pub from_agent: Option<String>,
    pub files: Option<Vec<String>>,
}

/// Aggregated queue counts backing `GET /api/queue/status` (spec.md §4.7).
/// `active_conversations` lives outside the queue store (it is Conversation
/// Manager state) and is merged in by the Control API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dead: u64,
    pub responses_pending: u64,
}
