//! Proxy wire protocol
//!
//! Requests and responses travel as length-prefixed JSON frames,
//! correlated by a per-request id. The first request of every
//! connection must be `Hello` carrying the preshared key.

use crate::error::Error;
use crate::models::{LocalStateTransition, ServiceDescriptor};
use control_core::{LifecycleState, ServiceCategory, ServiceStatus, SteeringCommand};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client request with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id echoed by the response
    pub id: Uuid,
    /// The operation to perform
    pub request: RegistryRequest,
}

/// A server response with the correlation id it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id of the request
    pub id: Uuid,
    /// The outcome
    pub response: RegistryResponse,
}

/// Operations the proxy exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegistryRequest {
    /// Connection handshake with the preshared key
    Hello {
        /// The preshared key
        key: String,
    },
    /// Register a descriptor
    Register {
        /// The descriptor to store
        descriptor: ServiceDescriptor,
    },
    /// Fetch by process id
    FindById {
        /// Process id
        id: u32,
    },
    /// Fetch by name
    FindByName {
        /// Component name
        name: String,
    },
    /// Fetch everything
    FindAll,
    /// Fetch by category
    FindAllByCategory {
        /// Component category
        category: ServiceCategory,
    },
    /// Fetch by status
    FindAllByStatus {
        /// Component status
        status: ServiceStatus,
    },
    /// Fetch by local state
    FindAllByState {
        /// Local state
        state: LifecycleState,
    },
    /// Update a component's status
    UpdateStatus {
        /// Process id
        id: u32,
        /// New status
        status: ServiceStatus,
    },
    /// Apply a steering command to a component's local state
    UpdateLocalState {
        /// Process id
        id: u32,
        /// The command to apply
        command: SteeringCommand,
    },
    /// Re-derive the global state
    UpdateGlobalState,
    /// Read the memoized global state
    CurrentGlobalState,
    /// Read the memoized global status
    CurrentGlobalStatus,
    /// Read the uptime
    SystemUptime,
    /// Read the local transition trace
    LocalHistory,
    /// Read the global transition trace
    GlobalHistory,
    /// Request a graceful registry shutdown
    Stop,
}

/// Error codes carried across the proxy boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorCode {
    /// Duplicate process id on registration
    DuplicateId,
    /// No descriptor matched
    NotFound,
    /// Transition rules rejected the command
    IllegalTransition,
    /// The component has no local state
    Stateless,
    /// Handshake key mismatch
    AuthFailed,
    /// Anything else
    Internal,
}

/// Possible outcomes of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum RegistryResponse {
    /// Operation succeeded with nothing to return
    Ok,
    /// One descriptor
    Descriptor(ServiceDescriptor),
    /// Zero or one descriptor
    OptionalDescriptor(Option<ServiceDescriptor>),
    /// A descriptor list
    Descriptors(Vec<ServiceDescriptor>),
    /// A lifecycle state
    State(LifecycleState),
    /// A status
    Status(ServiceStatus),
    /// Uptime in milliseconds
    UptimeMillis(u64),
    /// The local transition trace
    LocalHistory(Vec<LocalStateTransition>),
    /// The global transition trace
    GlobalHistory(Vec<LifecycleState>),
    /// The operation failed
    Error {
        /// Machine-readable code
        code: WireErrorCode,
        /// Human-readable context
        message: String,
    },
}

impl RegistryResponse {
    /// Build the error response for a registry error.
    pub fn from_error(error: &Error) -> Self {
        let code = match error {
            Error::DuplicateId(_) => WireErrorCode::DuplicateId,
            Error::NotFound(_) => WireErrorCode::NotFound,
            Error::IllegalTransition { .. } => WireErrorCode::IllegalTransition,
            Error::Stateless(_) => WireErrorCode::Stateless,
            Error::AuthFailed => WireErrorCode::AuthFailed,
            _ => WireErrorCode::Internal,
        };
        RegistryResponse::Error {
            code,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_round_trips() {
        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            request: RegistryRequest::UpdateLocalState {
                id: 7,
                command: SteeringCommand::Init,
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, envelope.id);
        assert!(matches!(
            decoded.request,
            RegistryRequest::UpdateLocalState { id: 7, command: SteeringCommand::Init }
        ));
    }

    #[test]
    fn error_codes_map_from_errors() {
        let response = RegistryResponse::from_error(&Error::DuplicateId(3));
        assert!(matches!(
            response,
            RegistryResponse::Error { code: WireErrorCode::DuplicateId, .. }
        ));
        let response = RegistryResponse::from_error(&Error::AuthFailed);
        assert!(matches!(
            response,
            RegistryResponse::Error { code: WireErrorCode::AuthFailed, .. }
        ));
    }
}
