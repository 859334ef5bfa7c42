//! Data models for the service registry

use chrono::{DateTime, Utc};
use control_core::{HubEndpointRecord, LifecycleState, ServiceCategory, ServiceStatus,
    SteeringCommand};
use control_fabric::QueuePair;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Communication endpoint recorded for a registered component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentEndpoint {
    /// The component is not directly addressable
    None,

    /// Shared in-memory queue pair (single-host mode).
    ///
    /// Queue endpoints live only inside the hosting process and are
    /// never carried across the proxy; serializing one is a protocol
    /// violation.
    #[serde(skip)]
    Queues(QueuePair),

    /// Per-peer-category socket addresses (distributed mode)
    Sockets(HashMap<ServiceCategory, SocketAddr>),

    /// Opaque hub connection endpoint produced by a hub payload
    HubConnection(HubEndpointRecord),
}

impl ComponentEndpoint {
    /// The address a peer of the given category should dial.
    pub fn socket_for(&self, category: ServiceCategory) -> Option<SocketAddr> {
        match self {
            ComponentEndpoint::Sockets(map) => map.get(&category).copied(),
            _ => None,
        }
    }

    /// The queue pair half held for the peer, in single-host mode.
    pub fn queue_pair(&self) -> Option<&QueuePair> {
        match self {
            ComponentEndpoint::Queues(pair) => Some(pair),
            _ => None,
        }
    }

    /// The hub endpoint record, for Interscale-Hub entries.
    pub fn hub_record(&self) -> Option<&HubEndpointRecord> {
        match self {
            ComponentEndpoint::HubConnection(record) => Some(record),
            _ => None,
        }
    }
}

/// A registered component's record.
///
/// The process id is the registry key: two descriptors with the same id
/// are the same component. Identity is stable across updates; only the
/// status and the local state ever mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique process identifier (immutable)
    pub id: u32,

    /// Human-readable name (immutable)
    pub name: String,

    /// Component role (immutable)
    pub category: ServiceCategory,

    /// Communication endpoint (immutable)
    pub endpoint: ComponentEndpoint,

    /// Liveness status
    pub current_status: ServiceStatus,

    /// Local state; stateless categories carry none
    pub current_state: Option<LifecycleState>,

    /// When the component registered
    pub registered_at: DateTime<Utc>,
}

impl ServiceDescriptor {
    /// Create a descriptor ready for registration.
    pub fn new(
        id: u32,
        name: impl Into<String>,
        category: ServiceCategory,
        endpoint: ComponentEndpoint,
        current_status: ServiceStatus,
        current_state: Option<LifecycleState>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            endpoint,
            current_status,
            current_state,
            registered_at: Utc::now(),
        }
    }

    /// A descriptor for a stateful workflow participant starting READY.
    pub fn stateful(
        id: u32,
        name: impl Into<String>,
        category: ServiceCategory,
        endpoint: ComponentEndpoint,
    ) -> Self {
        Self::new(
            id,
            name,
            category,
            endpoint,
            ServiceStatus::Up,
            Some(LifecycleState::Ready),
        )
    }

    /// A descriptor for a stateless component such as C&C.
    pub fn stateless(
        id: u32,
        name: impl Into<String>,
        category: ServiceCategory,
        endpoint: ComponentEndpoint,
    ) -> Self {
        Self::new(id, name, category, endpoint, ServiceStatus::Up, None)
    }

    /// A descriptor holding one hub connection endpoint.
    pub fn hub_endpoint(record: HubEndpointRecord) -> Self {
        let name = format!("interscale-hub-{}", record.pid);
        Self::new(
            record.pid,
            name,
            ServiceCategory::InterscaleHub,
            ComponentEndpoint::HubConnection(record),
            ServiceStatus::Up,
            None,
        )
    }
}

/// One entry of the append-only local transition trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStateTransition {
    /// State before the command was applied
    pub state_before: LifecycleState,
    /// The command that was applied
    pub input_command: SteeringCommand,
    /// State after the command was applied
    pub state_after: LifecycleState,
}

/// The registry's global health record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Immutable start timestamp
    pub uptime: DateTime<Utc>,
    /// Memoized derived global state
    pub current_global_state: LifecycleState,
    /// Memoized derived global status
    pub current_global_status: ServiceStatus,
    /// When the record was last refreshed
    pub last_updated: DateTime<Utc>,
}

impl HealthRecord {
    /// A fresh record; the workflow starts INITIALIZING.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            uptime: now,
            current_global_state: LifecycleState::Initializing,
            current_global_status: ServiceStatus::Up,
            last_updated: now,
        }
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new()
    }
}
