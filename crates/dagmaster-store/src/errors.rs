use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error during {operation}: {reason}")]
    Database { operation: String, reason: String },

    #[error("process instance {id} not found")]
    ProcessInstanceNotFound { id: i64 },

    #[error("task instance {id} not found")]
    TaskInstanceNotFound { id: i64 },

    #[error("process definition {id} not found")]
    ProcessDefinitionNotFound { id: i64 },

    #[error("store connection unhealthy: {0}")]
    Unhealthy(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn database(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller should expect this to clear up if retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database { .. } | StoreError::Unhealthy(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::database("query", err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_are_transient() {
        let err = StoreError::database("select", "connection reset");
        assert!(err.is_transient());
    }

    #[test]
    fn not_found_errors_are_not_transient() {
        let err = StoreError::ProcessInstanceNotFound { id: 1 };
        assert!(!err.is_transient());
    }
}
