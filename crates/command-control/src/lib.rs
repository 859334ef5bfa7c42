//! Command & Control service: the fan-out/fan-in relay between the
//! orchestrator and the application companions.
//!
//! The relay is stateless. It receives one control command at a time
//! from the orchestrator, broadcasts it to every companion under the
//! `steering` topic, pulls exactly one reply per registered companion
//! in arrival order, and hands the aggregated list back. FATAL events
//! short-circuit the loop; END concludes it.

pub mod error;
pub mod service;

pub use error::{Error, Result};
pub use service::{CommandControlService, CompanionChannels};
