use thiserror::Error;

#[derive(Error, Debug)]
pub enum RootStoreError {
    #[error("Invalid feature module: {0}")]
    InvalidModule(String),

    #[error("Reducer panicked while applying {action_type}: {message}")]
    ReducerPanicked { action_type: String, message: String },

    #[error("Store has been shut down")]
    ShutDown,

    #[error("No tokio runtime available to drive effect pipelines")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
