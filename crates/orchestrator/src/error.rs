//! Error types for the orchestrator

use thiserror::Error;

/// Unified error type for orchestration
#[derive(Error, Debug)]
pub enum Error {
    /// The workflow was torn down
    #[error("orchestration terminated by {0}")]
    Terminated(&'static str),

    /// No step size could be extracted from the INIT replies
    #[error("could not determine the global minimum step size")]
    NoStepSize,

    /// A required peer endpoint was not found in the registry
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),

    /// A command arrived that has no place in the workflow
    #[error("steering command rejected: {0}")]
    InvalidCommand(String),

    /// Something arrived that the orchestrator cannot serve
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Registry failure
    #[error(transparent)]
    Registry(#[from] service_registry::Error),

    /// Messaging fabric failure
    #[error(transparent)]
    Fabric(#[from] control_fabric::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
