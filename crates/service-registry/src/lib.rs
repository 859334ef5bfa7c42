//! Authoritative service registry with health bookkeeping.
//!
//! The registry holds one descriptor per registered control-plane
//! component, validates every local state transition against the
//! workflow transition rules, derives the global state from the
//! descriptor set, and keeps append-only transition histories for
//! post-mortem diagnostics.
//!
//! Remote components reach the registry through [`RegistryClient`],
//! a transparent proxy speaking length-prefixed JSON frames over TCP,
//! authenticated by a preshared key. The in-process registry and the
//! proxy implement the same [`RegistryApi`], so callers cannot tell
//! the deployment modes apart.

pub mod api;
pub mod client;
pub mod error;
pub mod fsm;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod wire;

pub use api::RegistryApi;
pub use client::RegistryClient;
pub use error::{Error, Result};
pub use models::{ComponentEndpoint, HealthRecord, LocalStateTransition, ServiceDescriptor};
pub use monitor::{HealthStatusMonitor, MonitorConfig};
pub use registry::HealthRegistry;
pub use server::RegistryServer;
