//! Server runtime errors.

use thiserror::Error;

use crate::{driver::DriverError, executor::ExecutorError};

/// Errors that stop the server runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Driver refused an event.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Actions could not be executed.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
}
