use dagmaster_model::ModelError;
use dagmaster_store::StoreError;
use thiserror::Error;

/// Errors raised while preparing or driving a `DagEngine`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("process definition invalid: {0}")]
    InvalidDefinition(String),

    #[error("task supervisor lost: {0}")]
    SupervisorLost(String),

    #[error("deserializing process definition: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller should expect this to clear up if the owning
    /// process instance is retried on the next tick rather than abandoned.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_forward_transience() {
        let err = EngineError::Store(StoreError::database("select", "timeout"));
        assert!(err.is_transient());
    }

    #[test]
    fn invalid_definition_is_not_transient() {
        let err = EngineError::InvalidDefinition("missing nodes".into());
        assert!(!err.is_transient());
    }
}
