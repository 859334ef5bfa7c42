//! Workflow lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a component or of the workflow as a whole.
///
/// Local states (one per stateful component) and the derived global
/// state are drawn from the same enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Component is being set up and has not reported readiness yet
    Initializing,
    /// Registered and waiting for INIT
    Ready,
    /// Negotiating endpoints and step sizes after INIT
    Synchronizing,
    /// Payloads are executing
    Running,
    /// Execution suspended by PAUSE
    Paused,
    /// Finished normally after END
    Terminated,
    /// Terminal failure state
    Error,
}

impl LifecycleState {
    /// Whether the state is terminal (no transition can leave it).
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated | LifecycleState::Error)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Ready => "READY",
            LifecycleState::Synchronizing => "SYNCHRONIZING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::Terminated => "TERMINATED",
            LifecycleState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::Terminated.is_terminal());
        assert!(LifecycleState::Error.is_terminal());
        assert!(!LifecycleState::Running.is_terminal());
    }

    #[test]
    fn serialized_names_are_screaming_snake() {
        let json = serde_json::to_string(&LifecycleState::Synchronizing).unwrap();
        assert_eq!(json, "\"SYNCHRONIZING\"");
    }
}
