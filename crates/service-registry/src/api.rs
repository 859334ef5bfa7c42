//! The registry operations as one trait
//!
//! The in-process registry and the network proxy implement the same
//! surface, so components work identically in single-host and
//! distributed deployments.

use crate::error::Result;
use crate::models::{LocalStateTransition, ServiceDescriptor};
use crate::registry::HealthRegistry;
use async_trait::async_trait;
use control_core::{LifecycleState, ServiceCategory, ServiceStatus, SteeringCommand};
use std::time::Duration;

/// Registry operations available to every control-plane component.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Register a component descriptor; fails on a duplicate id.
    async fn register(&self, descriptor: ServiceDescriptor) -> Result<()>;

    /// Fetch a descriptor snapshot by process id.
    async fn find_by_id(&self, id: u32) -> Result<Option<ServiceDescriptor>>;

    /// Fetch a descriptor snapshot by name.
    async fn find_by_name(&self, name: &str) -> Result<Option<ServiceDescriptor>>;

    /// Snapshots of every descriptor.
    async fn find_all(&self) -> Result<Vec<ServiceDescriptor>>;

    /// Snapshots of every descriptor of a category.
    async fn find_all_by_category(
        &self,
        category: ServiceCategory,
    ) -> Result<Vec<ServiceDescriptor>>;

    /// Snapshots of every descriptor with a status.
    async fn find_all_by_status(&self, status: ServiceStatus) -> Result<Vec<ServiceDescriptor>>;

    /// Snapshots of every descriptor in a local state.
    async fn find_all_by_state(&self, state: LifecycleState) -> Result<Vec<ServiceDescriptor>>;

    /// Update a component's liveness status.
    async fn update_status(&self, id: u32, status: ServiceStatus) -> Result<ServiceDescriptor>;

    /// Apply a steering command to a component's local state.
    async fn update_local_state(
        &self,
        id: u32,
        command: SteeringCommand,
    ) -> Result<ServiceDescriptor>;

    /// Re-derive and memoize the global state.
    async fn update_global_state(&self) -> Result<LifecycleState>;

    /// The memoized global state.
    async fn current_global_state(&self) -> Result<LifecycleState>;

    /// The memoized global status.
    async fn current_global_status(&self) -> Result<ServiceStatus>;

    /// Time since the registry started.
    async fn system_uptime(&self) -> Result<Duration>;

    /// The append-only local transition trace.
    async fn local_state_transition_history(&self) -> Result<Vec<LocalStateTransition>>;

    /// The append-only global transition trace.
    async fn global_state_transition_history(&self) -> Result<Vec<LifecycleState>>;

    /// Request a graceful registry shutdown.
    async fn stop(&self) -> Result<()>;
}

#[async_trait]
impl RegistryApi for HealthRegistry {
    async fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        HealthRegistry::register(self, descriptor).await
    }

    async fn find_by_id(&self, id: u32) -> Result<Option<ServiceDescriptor>> {
        Ok(HealthRegistry::find_by_id(self, id).await)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ServiceDescriptor>> {
        Ok(HealthRegistry::find_by_name(self, name).await)
    }

    async fn find_all(&self) -> Result<Vec<ServiceDescriptor>> {
        Ok(HealthRegistry::find_all(self).await)
    }

    async fn find_all_by_category(
        &self,
        category: ServiceCategory,
    ) -> Result<Vec<ServiceDescriptor>> {
        Ok(HealthRegistry::find_all_by_category(self, category).await)
    }

    async fn find_all_by_status(&self, status: ServiceStatus) -> Result<Vec<ServiceDescriptor>> {
        Ok(HealthRegistry::find_all_by_status(self, status).await)
    }

    async fn find_all_by_state(&self, state: LifecycleState) -> Result<Vec<ServiceDescriptor>> {
        Ok(HealthRegistry::find_all_by_state(self, state).await)
    }

    async fn update_status(&self, id: u32, status: ServiceStatus) -> Result<ServiceDescriptor> {
        HealthRegistry::update_status(self, id, status).await
    }

    async fn update_local_state(
        &self,
        id: u32,
        command: SteeringCommand,
    ) -> Result<ServiceDescriptor> {
        HealthRegistry::update_local_state(self, id, command).await
    }

    async fn update_global_state(&self) -> Result<LifecycleState> {
        HealthRegistry::update_global_state(self).await
    }

    async fn current_global_state(&self) -> Result<LifecycleState> {
        Ok(HealthRegistry::current_global_state(self).await)
    }

    async fn current_global_status(&self) -> Result<ServiceStatus> {
        Ok(HealthRegistry::current_global_status(self).await)
    }

    async fn system_uptime(&self) -> Result<Duration> {
        Ok(HealthRegistry::system_uptime(self).await)
    }

    async fn local_state_transition_history(&self) -> Result<Vec<LocalStateTransition>> {
        Ok(HealthRegistry::local_state_transition_history(self).await)
    }

    async fn global_state_transition_history(&self) -> Result<Vec<LifecycleState>> {
        Ok(HealthRegistry::global_state_transition_history(self).await)
    }

    async fn stop(&self) -> Result<()> {
        HealthRegistry::stop(self);
        Ok(())
    }
}
