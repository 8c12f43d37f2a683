use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed topic: no sensor id in '{0}'")]
    MalformedTopic(String),

    #[error("feed read error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error("ingest task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
