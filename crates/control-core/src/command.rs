//! Steering commands and the control-plane message envelope

use crate::payload::{HubEndpointRecord, SimulatorInit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-level steering commands driving the shared lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SteeringCommand {
    /// Launch payloads and negotiate endpoints
    Init,
    /// Start execution
    Start,
    /// Finish execution
    End,
    /// Suspend execution
    Pause,
    /// Resume a paused execution
    Resume,
    /// Leave the steering front-end without touching the workflow
    Exit,
}

impl fmt::Display for SteeringCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SteeringCommand::Init => "INIT",
            SteeringCommand::Start => "START",
            SteeringCommand::End => "END",
            SteeringCommand::Pause => "PAUSE",
            SteeringCommand::Resume => "RESUME",
            SteeringCommand::Exit => "EXIT",
        };
        f.write_str(name)
    }
}

/// Internal events injected into the command channels to trigger
/// emergency shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Tear everything down
    Fatal,
    /// A local state transition failed somewhere below
    StateUpdateFatal,
}

/// Optional parameter payload of a control command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandParameters {
    /// Hub connection endpoints appended to a simulator's INIT
    Init {
        /// Every hub endpoint the simulator must connect to
        hub_endpoints: Vec<HubEndpointRecord>,
    },
    /// Negotiated values carried by START
    Start {
        /// Minimum of all simulators' local minimum step sizes
        global_minimum_step_size: f64,
        /// Spike-detector identifiers, when a simulator exposed them
        spike_detectors: Option<Vec<u64>>,
    },
}

/// The unit of transmission on the steering fabric: a steering command
/// plus an optional parameter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// The steering command itself
    pub command: SteeringCommand,
    /// Parameters attached by the sender
    pub parameters: Option<CommandParameters>,
}

impl ControlCommand {
    /// A control command without parameters.
    pub fn bare(command: SteeringCommand) -> Self {
        Self {
            command,
            parameters: None,
        }
    }

    /// A control command carrying parameters.
    pub fn with_parameters(command: SteeringCommand, parameters: CommandParameters) -> Self {
        Self {
            command,
            parameters: Some(parameters),
        }
    }
}

/// What an application manager reports back to its companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ManagerReply {
    /// Simulator INIT outcome: PID plus local minimum step size
    SimulatorInit(SimulatorInit),
    /// Hub INIT outcome: one endpoint record per MPI rank
    HubInit(Vec<HubEndpointRecord>),
    /// Command executed
    Ok,
    /// Command failed
    Error,
    /// The manager's own state transition was rejected
    StateUpdateFatal,
}

/// What an application companion pushes upstream to C&C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CompanionReply {
    /// Simulator INIT response forwarded to the orchestrator
    SimulatorInit(SimulatorInit),
    /// Hub INIT completed; endpoints went into the registry instead
    Empty,
    /// Command executed
    Ok,
    /// Command failed
    Error,
    /// An emergency event propagated as a reply
    Event(Event),
}

impl CompanionReply {
    /// Whether this reply means the workflow must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CompanionReply::Error | CompanionReply::Event(_))
    }
}

/// Outcome reported to the steering front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    /// Command accepted and executed
    Ok,
    /// Command rejected or execution failed
    Error,
}

/// Envelope for everything that travels on the control plane.
///
/// Receivers must round-trip frames identically, so every edge of the
/// fabric speaks this one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ControlMessage {
    /// A steering command on its way down
    Command(ControlCommand),
    /// An emergency event
    Event(Event),
    /// A single companion reply on its way up
    Reply(CompanionReply),
    /// The aggregated reply list from C&C to the orchestrator
    Replies(Vec<CompanionReply>),
    /// A manager's reply to its companion
    ManagerReply(ManagerReply),
    /// The orchestrator's answer to the steering front-end
    Ack(AckStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ExchangeDirection, IntercommRole};

    #[test]
    fn control_command_round_trips() {
        let command = ControlCommand::with_parameters(
            SteeringCommand::Start,
            CommandParameters::Start {
                global_minimum_step_size: 0.1,
                spike_detectors: Some(vec![7, 11]),
            },
        );
        let bytes = serde_json::to_vec(&ControlMessage::Command(command.clone())).unwrap();
        let decoded: ControlMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, ControlMessage::Command(command));
    }

    #[test]
    fn replies_round_trip() {
        let replies = vec![
            CompanionReply::SimulatorInit(SimulatorInit {
                pid: 4711,
                local_minimum_step_size: 0.1,
                spike_detectors: None,
            }),
            CompanionReply::Empty,
            CompanionReply::Event(Event::StateUpdateFatal),
        ];
        let bytes = serde_json::to_vec(&ControlMessage::Replies(replies.clone())).unwrap();
        let decoded: ControlMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, ControlMessage::Replies(replies));
    }

    #[test]
    fn hub_init_round_trips() {
        let reply = ManagerReply::HubInit(vec![HubEndpointRecord {
            pid: 9,
            direction: ExchangeDirection::AToB,
            intercomm: IntercommRole::Sender,
            connection_info: "tag#0".to_string(),
        }]);
        let bytes = serde_json::to_vec(&reply).unwrap();
        assert_eq!(serde_json::from_slice::<ManagerReply>(&bytes).unwrap(), reply);
    }

    #[test]
    fn fatal_replies_are_detected() {
        assert!(CompanionReply::Error.is_fatal());
        assert!(CompanionReply::Event(Event::Fatal).is_fatal());
        assert!(!CompanionReply::Empty.is_fatal());
        assert!(!CompanionReply::Ok.is_fatal());
    }
}
