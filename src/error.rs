// src/error.rs
//
// Error taxonomy shared by every mock surface.

use thiserror::Error;

use crate::network::NetworkError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An assertion helper was used before the mock it reads from was installed.
    #[error("Incorrect usage: {0}")]
    IncorrectUsage(String),

    /// A recorded side effect did not match what the test expected.
    #[error("{0}")]
    Assertion(String),

    /// Injected business-rule failure, shaped like the real limit service's error.
    #[error("{message}")]
    HostLimit { limit: String, message: String },

    /// The mail mock was told to fail sends.
    #[error("Mail send failed: {0}")]
    Mail(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The snapshot facility rejected a recorded value.
    #[error("Snapshot mismatch: {0}")]
    Snapshot(String),

    /// Restoring one subsystem failed; logged by the orchestrator, never propagated.
    #[error("Failed to restore {subsystem}: {source}")]
    Teardown {
        subsystem: String,
        #[source]
        source: eyre::Report,
    },
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::IncorrectUsage(message.into())
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Error::Assertion(message.into())
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, Error::Assertion(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Error::IncorrectUsage(_))
    }
}
