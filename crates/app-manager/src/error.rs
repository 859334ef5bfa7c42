//! Error types for the application manager

use thiserror::Error;

/// Unified error type for payload supervision
#[derive(Error, Debug)]
pub enum Error {
    /// The payload process could not be spawned
    #[error("failed to launch payload: {reason}")]
    LaunchFailed {
        /// What went wrong
        reason: String,
    },

    /// The payload's INIT response could not be parsed
    #[error("could not parse payload response: {0}")]
    ResponseParse(String),

    /// The payload exited before delivering its INIT response
    #[error("payload exited with {code:?} before its INIT response")]
    PayloadExited {
        /// Exit code, if the payload exited normally
        code: Option<i32>,
    },

    /// The payload survived SIGTERM and SIGKILL
    #[error("payload {pid} could not be terminated")]
    Unkillable {
        /// PID of the stubborn payload
        pid: u32,
    },

    /// The manager was torn down by a FATAL event or signal
    #[error("application manager terminated by {0}")]
    Terminated(&'static str),

    /// A command arrived that the manager cannot serve
    #[error("unexpected message from the companion: {0}")]
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
