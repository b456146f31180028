use chrono::{DateTime, Utc};
use serde::Serialize;

/// A structured event published on the [`crate::EventBus`] and re-emitted as
/// an SSE frame by the Control API's `/api/events/stream` (spec.md §4.8, §6).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Every topic listed in spec.md §4.8, tagged by `type` in the wire format.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    MessageReceived {
        message_id: String,
        channel: Option<String>,
    },
    MessageEnqueued {
        message_id: String,
        agent_id: Option<String>,
    },
    AgentRouted {
        message_id: String,
        agent_id: String,
        team_id: Option<String>,
    },
    ChainStepStart {
        message_id: String,
        agent_id: String,
        team_id: Option<String>,
    },
    ChainStepDone {
        message_id: String,
        agent_id: String,
        team_id: Option<String>,
        response_length: usize,
    },
    ChainHandoff {
        from_agent_id: String,
        to_agent_id: String,
        team_id: String,
    },
    TeamChainStart {
        conversation_id: String,
        team_id: String,
    },
    TeamChainEnd {
        conversation_id: String,
        team_id: String,
        total: u32,
    },
    PipelineStep {
        conversation_id: String,
        team_id: String,
        agent_id: String,
        step: usize,
    },
    PipelineLoop {
        conversation_id: String,
        team_id: String,
        #[serde(rename = "loop")]
        loop_count: u32,
        max_loops: u32,
    },
    PipelineComplete {
        conversation_id: String,
        team_id: String,
        total: u32,
    },
    ResponseReady {
        message_id: String,
        response_text: String,
    },
    ProcessorStart {
        agent_id: String,
    },
}
