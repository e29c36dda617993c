use thiserror::Error;

/// Errors from the coordinator layer and the query pool.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] steerag_core::CoreError),

    #[error(transparent)]
    Engine(#[from] steerag_engine::EngineError),

    #[error(transparent)]
    Store(#[from] steerag_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("coordinator channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ServerError>;
