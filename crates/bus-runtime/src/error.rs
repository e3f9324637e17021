//! Runtime errors.

use message_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The global subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}
