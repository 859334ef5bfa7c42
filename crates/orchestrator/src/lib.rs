//! Orchestrator: the single steering authority of the workflow.
//!
//! The orchestrator accepts steering commands from the front-end,
//! validates them against the derived global state, broadcasts them
//! through C&C, aggregates the companion replies, and advances the
//! workflow. It is also the one place that decides between continuing
//! and tearing everything down: fatal replies and health-monitor
//! alarms both end in a FATAL broadcast and a registry stop.

pub mod error;
pub mod orchestrator;
pub mod steering;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use steering::SteeringClient;
