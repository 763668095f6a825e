//! Error types shared across the Kozmic crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Pulling the job's base image from the registry failed.
    #[error("failed to pull image: {0}")]
    ImagePull(String),

    /// An image that was expected to be present locally is not.
    #[error("image is missing: {0}")]
    ImageMissing(String),

    /// The container engine rejected or failed an operation.
    #[error("container engine error: {0}")]
    Engine(String),

    /// A hosted-git API call failed.
    #[error("remote API error: {0}")]
    RemoteApi(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// A job restart was requested before the job finished.
    #[error("cannot restart: {0}")]
    Restart(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
