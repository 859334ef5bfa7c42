//! Application companion: the per-action control-plane supervisor.
//!
//! One companion runs per action. It launches its application manager,
//! registers the action with the registry, and drives the manager
//! through the steering lifecycle: broadcast commands arrive from C&C,
//! replies are pushed back. Simulator companions discover hub
//! connection endpoints through the registry before forwarding INIT;
//! hub companions register the endpoints their payload produced.

pub mod affinity;
pub mod companion;
pub mod error;
pub mod launcher;
pub mod uplink;

pub use affinity::{CpuPinner, NoopPinner};
pub use companion::{ApplicationCompanion, CompanionConfig};
pub use error::{Error, Result};
pub use launcher::{ManagerLauncher, ManagerProcessConfig, ProcessManagerLauncher};
pub use uplink::CompanionUplink;
