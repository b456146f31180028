mod error;
mod model;
mod sqlite;
mod store;

pub use error::QueueError;
pub use model::{Message, MessageStatus, NewMessage, NewResponse, QueueStats, Response, ResponseStatus};
pub use sqlite::SqliteQueueStore;
pub use store::{QueueStore, DEFAULT_STALE_THRESHOLD_MS, MAX_RETRIES};
