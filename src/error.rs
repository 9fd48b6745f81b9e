use std::io;

use thiserror::Error;

use crate::backend::BufferId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected construction parameters or malformed input shapes.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("compute backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to write timing record: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Failures reported by a [`ComputeBackend`](crate::backend::ComputeBackend) primitive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("buffer {0:?} is not registered")]
    UnknownBuffer(BufferId),

    #[error("access of {len} elements at offset {offset} exceeds buffer {id:?} of length {capacity}")]
    OutOfBounds {
        id: BufferId,
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("output buffer {0:?} must not alias an input of this primitive")]
    AliasedOperands(BufferId),

    #[error("cannot allocate a buffer of {0} elements")]
    Allocation(usize),

    #[error("device is unavailable: {0}")]
    Unavailable(String),

    #[error("device queue is no longer reachable")]
    DeviceLost,

    #[error("kernel `{0}` failed")]
    Kernel(String),
}
