mod aggregate;
mod conversation;
mod manager;
mod pipeline_semantics;

pub use aggregate::{aggregate_responses, apply_long_response_handling, promote_send_files, LONG_RESPONSE_THRESHOLD};
pub use conversation::{Conversation, OriginalMessageData, TeamContext};
pub use manager::{ConversationManager, CONVERSATION_IDLE_TIMEOUT_MINUTES};
pub use pipeline_semantics::apply_pipeline_semantics;
