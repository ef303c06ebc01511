//! Workspace-level error handling

use thiserror::Error;

/// Edgescope error type
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed:\n{}", format_fields(.0))]
    Validation(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("worker error: {0}")]
    Worker(String),
}

fn format_fields(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Edgescope result type
pub type Result<T> = std::result::Result<T, EdgeError>;
