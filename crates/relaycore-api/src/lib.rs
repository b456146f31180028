//! Local HTTP control surface (spec.md §4.7): enqueue messages, poll
//! responses, ack them, inspect queue/log state, and stream events over SSE.
//!
//! Binds to loopback by default. Bearer-token auth is on by default; the
//! token is generated on first start and its hash persisted the same way the
//! gateway subsystem persists its own (see [`token`]).

mod auth;
mod error;
mod logs;
mod routes;
mod state;
mod token;

pub use auth::{bearer_auth_mw, AuthState};
pub use error::ApiError;
pub use logs::{LogCaptureLayer, LogEntry, LogRingBuffer};
pub use routes::router;
pub use state::{ApiContext, AppState};
pub use token::{RawToken, StoredToken, StoredTokenFile};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

/// Control API bind/auth settings (spec.md §6).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_host: String,
    pub port: u16,
    pub auth_enabled: bool,
    pub token_path: PathBuf,
}

impl ApiConfig {
    pub fn new(token_path: PathBuf) -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 3777,
            auth_enabled: true,
            token_path,
        }
    }

    pub fn default_token_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config/relaycore/token.yaml")
    }
}

/// Build the auth state for `config`, generating and persisting a bearer
/// token on first start. Prints the raw token once — it is never stored or
/// shown again.
fn load_auth(config: &ApiConfig) -> anyhow::Result<AuthState> {
    if !config.auth_enabled {
        info!("Control API auth disabled (RELAYCORE_API_AUTH=off)");
        return Ok(AuthState::disabled());
    }

    let (hash, fresh) = StoredTokenFile::load_or_generate(&config.token_path)?;
    if let Some(raw) = fresh {
        info!("=======================================================");
        info!("Control API bearer token (shown once — save it now!):");
        info!("  {}", raw.as_str());
        info!("=======================================================");
    }
    Ok(AuthState::enabled(hash))
}

/// Origin header is present and its host is a loopback address
/// (`localhost` / `127.0.0.1` / `[::1]`), any scheme or port (spec.md §4.7:
/// "CORS restricted to localhost").
fn is_loopback_origin(origin: &HeaderValue, _parts: &axum::http::request::Parts) -> bool {
    let Ok(origin) = origin.to_str() else { return false };
    let Ok(url) = origin.parse::<axum::http::Uri>() else { return false };
    matches!(url.host(), Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1"))
}

fn loopback_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(is_loopback_origin))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Assemble the router and serve it until the process is killed.
///
/// Binds to `config.bind_host:config.port`, wraps every route with bearer
/// auth (unless disabled) and a CORS layer restricted to loopback origins,
/// and blocks on `axum::serve`.
pub async fn serve(config: ApiConfig, ctx: Arc<ApiContext>) -> anyhow::Result<()> {
    let auth = load_auth(&config)?;
    let app_state = AppState { ctx, auth: auth.clone() };

    let cors = loopback_cors();

    let app = router(app_state.clone())
        .layer(middleware::from_fn_with_state(auth, bearer_auth_mw))
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Control API listening");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relaycore_config::ConfigProvider;
    use relaycore_conversation::ConversationManager;
    use relaycore_events::EventBus;
    use relaycore_queue::{QueueStore, SqliteQueueStore};
    use tower::ServiceExt;

    use super::*;

    async fn test_ctx() -> Arc<ApiContext> {
        let dir = tempfile::tempdir().unwrap();
        let queue: Arc<dyn QueueStore> =
            Arc::new(SqliteQueueStore::open(&dir.path().join("queue.db")).unwrap());
        let config = Arc::new(ConfigProvider::new(dir.path().join("config.yaml")));
        let events = EventBus::new();
        let conversations = Arc::new(ConversationManager::new(queue.clone(), events.clone()));
        let (logs, _layer) = LogRingBuffer::new();
        Arc::new(ApiContext {
            config,
            queue,
            events,
            conversations,
            output_dir: dir.path().to_path_buf(),
            logs,
        })
    }

    #[tokio::test]
    async fn queue_status_reachable_without_auth() {
        let ctx = test_ctx().await;
        let state = AppState { ctx, auth: AuthState::disabled() };
        let app = router(state);

        let req = axum::http::Request::builder()
            .uri("/api/queue/status")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    fn origin_parts() -> axum::http::request::Parts {
        axum::http::Request::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn loopback_origins_are_allowed() {
        let parts = origin_parts();
        for origin in ["http://localhost:3777", "https://127.0.0.1:8080", "http://[::1]:9"] {
            assert!(is_loopback_origin(&HeaderValue::from_str(origin).unwrap(), &parts), "{origin}");
        }
    }

    #[test]
    fn non_loopback_origins_are_rejected() {
        let parts = origin_parts();
        for origin in ["https://evil.example", "http://10.0.0.5:3777", "null"] {
            assert!(!is_loopback_origin(&HeaderValue::from_str(origin).unwrap(), &parts), "{origin}");
        }
    }

    #[tokio::test]
    async fn message_without_body_is_rejected() {
        let ctx = test_ctx().await;
        let state = AppState { ctx, auth: AuthState::disabled() };
        let app = router(state);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/message")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"message":""}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
