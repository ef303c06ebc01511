//! Shared-memory error handling

use thiserror::Error;

/// Frame pool error type
#[derive(Error, Debug)]
pub enum ShmError {
    #[error("segment {0:?} already exists")]
    AlreadyExists(String),

    #[error("segment {0:?} not found")]
    NotFound(String),

    #[error("segment {name:?} is {actual} bytes, expected at least {expected}")]
    TooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("manager is stopped")]
    Stopped,

    #[error("shm syscall failed for {name:?}: {source}")]
    Sys {
        name: String,
        #[source]
        source: nix::Error,
    },
}

impl ShmError {
    pub(crate) fn sys(name: &str, source: nix::Error) -> Self {
        ShmError::Sys {
            name: name.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShmError>;
