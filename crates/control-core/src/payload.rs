//! Structured records parsed from payload stdout at INIT time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A simulator's INIT response: its PID and local minimum step size,
/// optionally with spike-detector identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorInit {
    /// PID reported by the simulator itself
    pub pid: u32,
    /// The smallest step the simulator can take
    pub local_minimum_step_size: f64,
    /// Spike-detector ids, exposed by some simulators only
    pub spike_detectors: Option<Vec<u64>>,
}

/// Direction of data exchange a hub rank mediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeDirection {
    /// Data flows from simulator A to simulator B
    AToB,
    /// Data flows from simulator B to simulator A
    BToA,
}

impl FromStr for ExchangeDirection {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A_TO_B" => Ok(ExchangeDirection::AToB),
            "B_TO_A" => Ok(ExchangeDirection::BToA),
            other => Err(UnknownToken(other.to_string())),
        }
    }
}

/// Which side of the intercommunicator a hub rank plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntercommRole {
    /// Rank sends data into the exchange
    Sender,
    /// Rank receives data from the exchange
    Receiver,
}

impl FromStr for IntercommRole {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(IntercommRole::Sender),
            "receiver" => Ok(IntercommRole::Receiver),
            other => Err(UnknownToken(other.to_string())),
        }
    }
}

/// A token that is not part of the payload protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol token: {0}")]
pub struct UnknownToken(pub String);

/// One hub rank's connection endpoint, produced at INIT and registered
/// in the registry for simulators to discover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEndpointRecord {
    /// PID of the hub rank
    pub pid: u32,
    /// Which way data flows through this rank
    pub direction: ExchangeDirection,
    /// Sender or receiver side of the intercommunicator
    pub intercomm: IntercommRole,
    /// Opaque connection string a simulator passes to its payload
    pub connection_info: String,
}

impl fmt::Display for HubEndpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hub pid {} ({:?}/{:?}): {}",
            self.pid, self.direction, self.intercomm, self.connection_info
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_parse_from_protocol_tokens() {
        assert_eq!("A_TO_B".parse(), Ok(ExchangeDirection::AToB));
        assert_eq!("B_TO_A".parse(), Ok(ExchangeDirection::BToA));
        assert!("NEST_to_TVB".parse::<ExchangeDirection>().is_err());
    }

    #[test]
    fn intercomm_roles_parse() {
        assert_eq!("sender".parse(), Ok(IntercommRole::Sender));
        assert_eq!("receiver".parse(), Ok(IntercommRole::Receiver));
        assert!("both".parse::<IntercommRole>().is_err());
    }
}
