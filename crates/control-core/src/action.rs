//! Action descriptions and port-range configuration

use serde::{Deserialize, Serialize};

/// What kind of payload an action launches.
///
/// The distinction is symbolic; nothing in the control plane keys on
/// concrete action identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A scientific simulator reporting a local minimum step size
    Simulator,
    /// A data-exchange hub exposing MPI connection endpoints
    InterscaleHub,
}

/// A single payload program to launch: command line plus role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Human-readable action name, unique within the workflow
    pub name: String,
    /// Simulator or hub
    pub kind: ActionKind,
    /// Program to execute
    pub program: String,
    /// Arguments handed to the program
    pub args: Vec<String>,
}

impl ActionConfig {
    /// Arguments with surrounding whitespace stripped.
    ///
    /// Arguments that are empty after stripping are dropped entirely
    /// rather than passed as empty strings.
    pub fn stripped_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Inclusive port range an endpoint may bind inside, with a bounded
/// number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port to try
    pub min: u16,
    /// Last port to try
    pub max: u16,
    /// Upper bound on bind attempts
    pub max_tries: u32,
}

impl PortRange {
    /// Ports of the range in ascending order, capped at `max_tries`.
    pub fn candidates(&self) -> impl Iterator<Item = u16> + '_ {
        (self.min..=self.max).take(self.max_tries as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripping_drops_empty_arguments() {
        let action = ActionConfig {
            name: "sim-left".to_string(),
            kind: ActionKind::Simulator,
            program: "nest".to_string(),
            args: vec![
                " --steps 100 ".to_string(),
                "".to_string(),
                "   ".to_string(),
                "model.py".to_string(),
            ],
        };
        assert_eq!(action.stripped_args(), vec!["--steps 100", "model.py"]);
    }

    #[test]
    fn port_candidates_respect_max_tries() {
        let range = PortRange {
            min: 5000,
            max: 5100,
            max_tries: 3,
        };
        let candidates: Vec<u16> = range.candidates().collect();
        assert_eq!(candidates, vec![5000, 5001, 5002]);
    }

    #[test]
    fn port_candidates_stop_at_range_end() {
        let range = PortRange {
            min: 5000,
            max: 5001,
            max_tries: 10,
        };
        assert_eq!(range.candidates().count(), 2);
    }
}
