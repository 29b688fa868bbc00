use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordination session expired")]
    SessionExpired,

    #[error("lost connection to coordination service: {0}")]
    ConnectionLost(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("no such node: {0}")]
    NoNode(String),

    #[error("unknown failover lock path kind")]
    UnknownLockPath,

    #[error("store error: {0}")]
    Store(#[from] dagmaster_store::StoreError),

    #[error("model error: {0}")]
    Model(#[from] dagmaster_model::ModelError),

    #[error("coordination error: {0}")]
    Other(String),
}

impl CoordError {
    /// Whether the caller should log and keep going rather than treat this
    /// as fatal to the controller's watch-consumption loop.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CoordError::SessionExpired)
    }
}

pub type CoordResult<T> = Result<T, CoordError>;
