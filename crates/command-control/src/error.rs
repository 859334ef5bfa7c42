//! Error types for the C&C relay

use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    /// The relay was told to tear down by a FATAL event
    #[error("command and control terminated by {0}")]
    Terminated(&'static str),

    /// A companion descriptor carries no usable endpoint
    #[error("companion {0} has no usable endpoint")]
    MissingEndpoint(String),

    /// Something other than a command arrived on the command edge
    #[error("unexpected message on the orchestrator edge: {0}")]
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
