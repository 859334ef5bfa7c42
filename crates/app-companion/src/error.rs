//! Error types for the application companion

use thiserror::Error;

/// Unified error type for the companion
#[derive(Error, Debug)]
pub enum Error {
    /// The companion was torn down by a FATAL event or signal
    #[error("application companion terminated by {0}")]
    Terminated(&'static str),

    /// The manager reported a failure executing a command
    #[error("application manager failed executing {0}")]
    ManagerFailed(&'static str),

    /// Launching the manager failed
    #[error("could not launch the application manager: {0}")]
    ManagerLaunch(String),

    /// A required peer endpoint was not found in the registry
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),

    /// Something arrived that the companion cannot serve
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Registry failure
    #[error(transparent)]
    Registry(#[from] service_registry::Error),

    /// Messaging fabric failure
    #[error(transparent)]
    Fabric(#[from] control_fabric::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
