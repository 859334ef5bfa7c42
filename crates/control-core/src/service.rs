//! Service component categories and statuses

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of component roles known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    /// Per-action supervisor
    ApplicationCompanion,
    /// The single steering authority
    Orchestrator,
    /// Command & Control relay
    CommandControl,
    /// Steering front-end
    Steering,
    /// Data-exchange hub endpoint record
    InterscaleHub,
    /// Per-action payload runner
    ApplicationManager,
    /// The registry service itself
    Registry,
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceCategory::ApplicationCompanion => "application_companion",
            ServiceCategory::Orchestrator => "orchestrator",
            ServiceCategory::CommandControl => "command_control",
            ServiceCategory::Steering => "steering",
            ServiceCategory::InterscaleHub => "interscale_hub",
            ServiceCategory::ApplicationManager => "application_manager",
            ServiceCategory::Registry => "registry",
        };
        f.write_str(name)
    }
}

/// Liveness status of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    /// Component is reachable
    Up,
    /// Component was observed dead
    Down,
}
