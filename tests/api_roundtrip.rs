//! Control API → Dispatcher → Control API round trip: post a message through
//! the real axum router, process it with the real dispatcher pipeline, and
//! read the reply back out through the router (spec.md §4.7, §4.6).

use std::path::PathBuf;
use std::sync::Arc;

use relaycore_api::{ApiContext, AppState, AuthState, LogRingBuffer};
use relaycore_config::{AgentConfig, Config, ConfigProvider};
use relaycore_conversation::ConversationManager;
use relaycore_dispatcher::{process_message, DispatcherContext, EchoInvoker};
use relaycore_events::EventBus;
use relaycore_queue::{QueueStore, SqliteQueueStore};
use tower::ServiceExt;

#[tokio::test]
async fn posted_message_is_routed_processed_and_acked_via_the_api() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    let cfg = Config {
        agents: [(
            "writer".to_string(),
            AgentConfig {
                id: "writer".into(),
                display_name: "Writer".into(),
                provider: "mock".into(),
                model: "mock".into(),
                working_dir: PathBuf::from("."),
                system_prompt: None,
                prompt_file: None,
                reasoning_effort: None,
            },
        )]
        .into_iter()
        .collect(),
        teams: Default::default(),
        workspace: dir.path().to_path_buf(),
        model: None,
    };
    std::fs::write(&config_path, serde_yaml::to_string(&cfg).unwrap()).unwrap();

    let config = Arc::new(ConfigProvider::new(config_path));
    let queue: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let events = EventBus::new();
    let conversations = Arc::new(ConversationManager::new(Arc::clone(&queue), events.clone()));
    let output_dir = dir.path().join("outputs");
    let (logs, _layer) = LogRingBuffer::new();

    let api_ctx = Arc::new(ApiContext {
        config: Arc::clone(&config),
        queue: Arc::clone(&queue),
        events: events.clone(),
        conversations: Arc::clone(&conversations),
        output_dir: output_dir.clone(),
        logs,
    });
    let app = relaycore_api::router(AppState { ctx: api_ctx, auth: AuthState::disabled() });

    let post = axum::http::Request::builder()
        .method("POST")
        .uri("/api/message")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            r#"{"message":"@writer draft the release notes","channel":"cli","sender":"alice"}"#,
        ))
        .unwrap();
    let resp = app.clone().oneshot(post).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    // Drive the dispatcher pipeline directly against the same queue/context
    // the API just enqueued into, the same as the real dispatcher loop would.
    let dispatcher_ctx = Arc::new(DispatcherContext {
        config,
        queue: Arc::clone(&queue),
        events,
        conversations,
        invoker: Arc::new(EchoInvoker),
        output_dir,
    });
    let claimed = queue.claim_next_message("writer").await.unwrap().unwrap();
    assert!(claimed.body.contains("[cli/alice]:"));
    assert!(claimed.body.contains("draft the release notes"));
    process_message(dispatcher_ctx, claimed).await.unwrap();

    let get = axum::http::Request::builder()
        .uri("/api/responses/pending?channel=cli")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.oneshot(get).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let responses: Vec<relaycore_queue::Response> = serde_json::from_slice(&body).unwrap();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].body.contains("echo from writer"));
}
