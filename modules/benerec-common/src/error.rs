use thiserror::Error;

/// Engine-level error taxonomy. Request-path code never lets these reach the
/// HTTP caller: connectivity and data errors degrade to documented neutral
/// defaults at the boundary where they occur.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
