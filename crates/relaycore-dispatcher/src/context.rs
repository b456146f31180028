use std::path::PathBuf;
use std::sync::Arc;

use relaycore_config::ConfigProvider;
use relaycore_conversation::ConversationManager;
use relaycore_events::EventBus;
use relaycore_queue::QueueStore;

use crate::invoker::Invoker;

/// Shared, cloneable wiring every claimed message is processed against.
pub struct DispatcherContext {
    pub config: Arc<ConfigProvider>,
    pub queue: Arc<dyn QueueStore>,
    pub events: EventBus,
    pub conversations: Arc<ConversationManager>,
    pub invoker: Arc<dyn Invoker>,
    /// Directory long responses and conversation spill files are written to.
    pub output_dir: PathBuf,
}
