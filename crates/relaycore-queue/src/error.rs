#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("queue worker task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("no such message id {0}")]
    NotFound(i64),
}
