//! Messaging fabric of the control plane.
//!
//! Two deployment modes share one wire format: bounded in-memory queues
//! for single-host runs, and message-oriented TCP sockets for
//! distributed runs. Every message is a length-prefixed serialized
//! [`ControlMessage`](control_core::ControlMessage); the broadcast
//! channel additionally carries a topic frame.
//!
//! All receive paths observe the process-wide [`ShutdownFlag`] and
//! surface a synthetic FATAL event instead of blocking forever once it
//! is set.

pub mod error;
pub mod frame;
pub mod link;
pub mod queue;
pub mod shutdown;
pub mod socket;

pub use error::{Error, Result};
pub use link::{collect_in_arrival_order, Duplex};
pub use queue::QueuePair;
pub use shutdown::ShutdownFlag;
pub use socket::{
    bind_first_available, PubEndpoint, PullEndpoint, PushEndpoint, RepEndpoint, ReqEndpoint,
    SubEndpoint,
};

use std::time::Duration;

/// Topic under which steering commands are broadcast.
pub const STEERING_TOPIC: &str = "steering";

/// Default blocking-receive timeout before the shutdown flag is
/// re-inspected.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);
