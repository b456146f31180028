use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use relaycore_events::{Event, EventKind};
use relaycore_queue::{NewMessage, Response as ResponseRow};
use relaycore_router::resolve_initial_routing;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(post_message))
        .route("/api/responses/pending", get(get_pending_responses))
        .route("/api/responses/:id/ack", post(ack_response))
        .route("/api/responses", get(get_recent_responses))
        .route("/api/messages/sent", get(get_recent_sent_messages))
        .route("/api/queue/status", get(get_queue_status))
        .route("/api/logs", get(get_logs))
        .route("/api/events/stream", get(get_events_stream))
        .with_state(state)
}

// ── POST /api/message ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageBody {
    pub message: String,
    pub agent: Option<String>,
    pub sender: Option<String>,
    pub channel: Option<String>,
    pub files: Option<Vec<String>>,
    pub message_id: Option<String>,
    pub sender_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageAck {
    pub ok: bool,
    pub message_id: String,
}

/// `POST /api/message` (spec.md §4.7). Pre-resolves routing — including the
/// pipeline-leader override — at accept time, so the stored row already
/// carries its target `agent` and the Dispatcher's per-agent FIFO claim can
/// pick it up without re-parsing (spec.md §4.6 steps 2-4 run here, once).
async fn post_message(
    State(state): State<AppState>,
    Json(body): Json<PostMessageBody>,
) -> Result<Json<PostMessageAck>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }

    let channel = body.channel.clone().unwrap_or_else(|| "api".to_string());
    let sender = body.sender.clone().unwrap_or_else(|| "api".to_string());
    let has_explicit_channel_and_sender = body.channel.is_some() && body.sender.is_some();

    let raw_body = if has_explicit_channel_and_sender {
        format!("[{channel}/{sender}]: {}", body.message)
    } else {
        body.message.clone()
    };

    let (agent_id, stored_body, team_id) = match &body.agent {
        Some(agent) => (agent.clone(), raw_body, None),
        None => {
            let snapshot = state.ctx.config.snapshot();
            let result = resolve_initial_routing(&raw_body, &snapshot);
            let team_id = if result.is_team { result.team_id } else { None };
            (result.agent_id, result.message, team_id)
        }
    };

    let external_id = body.message_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state.ctx.events.publish(Event::new(EventKind::MessageReceived {
        message_id: external_id.clone(),
        channel: Some(channel.clone()),
    }));
    state.ctx.events.publish(Event::new(EventKind::AgentRouted {
        message_id: external_id.clone(),
        agent_id: agent_id.clone(),
        team_id,
    }));

    state
        .ctx
        .queue
        .enqueue_message(NewMessage {
            external_id: external_id.clone(),
            channel,
            sender,
            sender_address: body.sender_id.clone(),
            body: stored_body,
            files: body.files.clone(),
            agent: Some(agent_id.clone()),
            conversation_id: None,
            from_agent: None,
        })
        .await?;

    state.ctx.events.publish(Event::new(EventKind::MessageEnqueued {
        message_id: external_id.clone(),
        agent_id: Some(agent_id),
    }));

    Ok(Json(PostMessageAck { ok: true, message_id: external_id }))
}

// ── GET /api/responses/pending ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub channel: String,
}

async fn get_pending_responses(
    State(state): State<AppState>,
    Query(q): Query<ChannelQuery>,
) -> Result<Json<Vec<ResponseRow>>, ApiError> {
    let responses = state.ctx.queue.pending_responses_for_channel(&q.channel).await?;
    Ok(Json(responses))
}

// ── POST /api/responses/:id/ack ────────────────────────────────────────────

async fn ack_response(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<serde_json::Value>, ApiError> {
    state.ctx.queue.ack_response(id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ── GET /api/responses & /api/messages/sent ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AgentsQuery {
    pub agent: Option<String>,
    pub agents: Option<String>,
    pub limit: Option<usize>,
}

fn agent_filter(q: &AgentsQuery) -> Option<Vec<String>> {
    let mut ids: Vec<String> = Vec::new();
    if let Some(agent) = &q.agent {
        ids.push(agent.clone());
    }
    if let Some(agents) = &q.agents {
        ids.extend(agents.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
    }
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

const DEFAULT_LIST_LIMIT: usize = 50;

async fn get_recent_responses(
    State(state): State<AppState>,
    Query(q): Query<AgentsQuery>,
) -> Result<Json<Vec<ResponseRow>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let agents = agent_filter(&q);
    let responses = state.ctx.queue.recent_responses(agents.as_deref(), limit).await?;
    Ok(Json(responses))
}

async fn get_recent_sent_messages(
    State(state): State<AppState>,
    Query(q): Query<AgentsQuery>,
) -> Result<Json<Vec<relaycore_queue::Message>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let agents = agent_filter(&q);
    let messages = state.ctx.queue.recent_sent_messages(agents.as_deref(), limit).await?;
    Ok(Json(messages))
}

// ── GET /api/queue/status ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dead: u64,
    pub responses_pending: u64,
    pub active_conversations: usize,
}

async fn get_queue_status(State(state): State<AppState>) -> Result<Json<QueueStatusResponse>, ApiError> {
    let stats = state.ctx.queue.queue_stats().await?;
    let active_conversations = state.ctx.conversations.ids().await.len();
    Ok(Json(QueueStatusResponse {
        pending: stats.pending,
        processing: stats.processing,
        completed: stats.completed,
        dead: stats.dead,
        responses_pending: stats.responses_pending,
        active_conversations,
    }))
}

// ── GET /api/logs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

const DEFAULT_LOG_LIMIT: usize = 200;

async fn get_logs(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Json<Vec<crate::logs::LogEntry>> {
    let limit = q.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.ctx.logs.tail(limit))
}

// ── GET /api/events/stream ──────────────────────────────────────────────────

async fn get_events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.ctx.events.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(to_sse(&event)),
        Err(BroadcastStreamRecvError::Lagged(_)) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &Event) -> Result<SseEvent, Infallible> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(SseEvent::default().data(payload))
}
