use std::path::PathBuf;
use std::sync::Arc;

use relaycore_config::ConfigProvider;
use relaycore_conversation::ConversationManager;
use relaycore_events::EventBus;
use relaycore_queue::QueueStore;

use crate::auth::AuthState;
use crate::logs::LogRingBuffer;

/// Everything the Control API's handlers read or write.
pub struct ApiContext {
    pub config: Arc<ConfigProvider>,
    pub queue: Arc<dyn QueueStore>,
    pub events: EventBus,
    pub conversations: Arc<ConversationManager>,
    pub output_dir: PathBuf,
    pub logs: LogRingBuffer,
}

/// The axum router's `State`: the shared context plus auth.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ApiContext>,
    pub auth: AuthState,
}
