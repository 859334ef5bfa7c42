//! Error types for the messaging fabric

use thiserror::Error;

/// Unified error type for fabric operations
#[derive(Error, Debug)]
pub enum Error {
    /// A frame exceeded the sanity bound
    #[error("frame of {len} bytes exceeds the maximum of {max}")]
    FrameTooLarge {
        /// Length announced by the prefix
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// The peer closed the connection
    #[error("peer closed the connection")]
    PeerClosed,

    /// The in-memory channel was closed by its other half
    #[error("queue endpoint closed")]
    QueueClosed,

    /// No port in the configured range could be bound
    #[error("no free port in range [{min}, {max}]")]
    BindExhausted {
        /// Lower bound of the range
        min: u16,
        /// Upper bound of the range
        max: u16,
    },

    /// Connecting to a peer failed after bounded retries
    #[error("could not connect to {addr}: {reason}")]
    ConnectFailed {
        /// Address that was dialled
        addr: String,
        /// Last I/O error observed
        reason: String,
    },

    /// A subscriber presented an unexpected topic frame
    #[error("topic mismatch: expected {expected:?}, got {got:?}")]
    TopicMismatch {
        /// Topic this endpoint subscribed to
        expected: String,
        /// Topic carried by the frame
        got: String,
    },

    /// Not every expected subscriber was connected when broadcasting
    #[error("broadcast incomplete: {connected} of {expected} subscribers connected")]
    BroadcastIncomplete {
        /// Subscribers required for an atomic broadcast
        expected: usize,
        /// Subscribers actually connected
        connected: usize,
    },

    /// The process-wide shutdown flag was raised mid-operation
    #[error("shutting down")]
    ShuttingDown,

    /// Serialization failure
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
