//! Error types for the service registry

use thiserror::Error;

/// Unified error type for registry operations.
///
/// Every variant crosses the proxy boundary as a value; none surfaces
/// as an abnormal termination on the other side.
#[derive(Error, Debug)]
pub enum Error {
    /// A descriptor with the same process id is already registered
    #[error("component {0} is already registered")]
    DuplicateId(u32),

    /// No descriptor matches the query
    #[error("component not found: {0}")]
    NotFound(String),

    /// The transition rules forbid this (state, command) pair.
    /// The detail names the component, its state and the command.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// The component carries no local state
    #[error("component {0} has no local state")]
    Stateless(String),

    /// The preshared key did not match
    #[error("registry authentication failed")]
    AuthFailed,

    /// The proxy peer answered something the protocol does not allow
    #[error("unexpected registry response: {0}")]
    UnexpectedResponse(String),

    /// Messaging fabric failure
    #[error(transparent)]
    Fabric(#[from] control_fabric::Error),

    /// Serialization failure
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
