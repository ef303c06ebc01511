//! Capture error handling

use thiserror::Error;

/// Capture-side error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to spawn decoder: {0}")]
    Spawn(std::io::Error),

    #[error("decoder stdout is not available")]
    MissingStdout,

    #[error("shared memory error: {0}")]
    Shm(#[from] frame_shm::ShmError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
