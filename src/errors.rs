use thiserror::Error;

/// Errors that can surface from `MasterServer` startup and its supervised
/// loops. Anything reaching `main` as an `Err` is logged and turned into a
/// non-zero exit code; nothing past startup propagates an error out of a
/// running server (the engine and coordination layers swallow their own
/// transient failures per their own error types).
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("coordination error: {0}")]
    Coord(#[from] dagmaster_coord::CoordError),

    #[error("store error: {0}")]
    Store(#[from] dagmaster_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] dagmaster_engine::EngineError),

    #[error("model error: {0}")]
    Model(#[from] dagmaster_model::ModelError),

    #[error("invalid process definition for process instance {id}: {reason}")]
    InvalidDefinition { id: i64, reason: String },
}

pub type MasterResult<T> = Result<T, MasterError>;
