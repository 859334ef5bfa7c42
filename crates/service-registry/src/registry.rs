//! The in-process health registry

use crate::error::{Error, Result};
use crate::fsm::{derive_global_state, derive_global_status, next_local_state};
use crate::models::{HealthRecord, LocalStateTransition, ServiceDescriptor};
use chrono::Utc;
use control_core::{LifecycleState, ServiceCategory, ServiceStatus, SteeringCommand};
use futures::lock::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

static SHARED: OnceLock<Arc<HealthRegistry>> = OnceLock::new();

struct Inner {
    components: Vec<ServiceDescriptor>,
    health: HealthRecord,
    local_history: Vec<LocalStateTransition>,
    global_history: Vec<LifecycleState>,
}

/// Authoritative store of service descriptors and the derived global
/// health record.
///
/// All access is serialized by one internal lock, matching the
/// single-threaded request handling of the hosting server: registry
/// updates are linearizable. Descriptors handed out are snapshots;
/// mutation goes through the `update_*` operations.
pub struct HealthRegistry {
    inner: Mutex<Inner>,
    stopped: AtomicBool,
}

impl HealthRegistry {
    /// Create a fresh registry.
    ///
    /// The launcher contract starts exactly one registry per workflow;
    /// inside one hosting process use [`shared`](Self::shared), which
    /// guarantees the singleton. Direct construction exists for
    /// embedding and tests.
    pub fn new() -> Self {
        let mut global_history = Vec::new();
        global_history.push(LifecycleState::Initializing);
        Self {
            inner: Mutex::new(Inner {
                components: Vec::new(),
                health: HealthRecord::new(),
                local_history: Vec::new(),
                global_history,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    /// The process-wide registry instance. Constructing a second
    /// instance through this handle yields the first.
    pub fn shared() -> Arc<HealthRegistry> {
        SHARED.get_or_init(|| Arc::new(HealthRegistry::new())).clone()
    }

    /// Register a new component descriptor.
    ///
    /// Fails without touching the registry when a descriptor with the
    /// same process id already exists.
    pub async fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.components.iter().any(|c| c.id == descriptor.id) {
            return Err(Error::DuplicateId(descriptor.id));
        }
        info!(
            "registering {} ({}) as {}",
            descriptor.name, descriptor.id, descriptor.category
        );
        inner.components.push(descriptor);
        Ok(())
    }

    /// Fetch a descriptor snapshot by process id.
    pub async fn find_by_id(&self, id: u32) -> Option<ServiceDescriptor> {
        let inner = self.inner.lock().await;
        inner.components.iter().find(|c| c.id == id).cloned()
    }

    /// Fetch a descriptor snapshot by name.
    pub async fn find_by_name(&self, name: &str) -> Option<ServiceDescriptor> {
        let inner = self.inner.lock().await;
        inner.components.iter().find(|c| c.name == name).cloned()
    }

    /// Snapshots of every registered descriptor.
    pub async fn find_all(&self) -> Vec<ServiceDescriptor> {
        let inner = self.inner.lock().await;
        inner.components.clone()
    }

    /// Snapshots of every descriptor of a category.
    pub async fn find_all_by_category(
        &self,
        category: ServiceCategory,
    ) -> Vec<ServiceDescriptor> {
        let inner = self.inner.lock().await;
        inner
            .components
            .iter()
            .filter(|c| c.category == category)
            .cloned()
            .collect()
    }

    /// Snapshots of every descriptor with a status.
    pub async fn find_all_by_status(&self, status: ServiceStatus) -> Vec<ServiceDescriptor> {
        let inner = self.inner.lock().await;
        inner
            .components
            .iter()
            .filter(|c| c.current_status == status)
            .cloned()
            .collect()
    }

    /// Snapshots of every descriptor in a local state.
    pub async fn find_all_by_state(&self, state: LifecycleState) -> Vec<ServiceDescriptor> {
        let inner = self.inner.lock().await;
        inner
            .components
            .iter()
            .filter(|c| c.current_state == Some(state))
            .cloned()
            .collect()
    }

    /// Update the liveness status of a component.
    pub async fn update_status(&self, id: u32, status: ServiceStatus) -> Result<ServiceDescriptor> {
        let mut inner = self.inner.lock().await;
        let component = inner
            .components
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        debug!("{}: status {:?} -> {:?}", component.name, component.current_status, status);
        component.current_status = status;
        Ok(component.clone())
    }

    /// Apply a steering command to a component's local state.
    ///
    /// An illegal (state, command) pair drives the descriptor to ERROR
    /// (terminal for that component), records the rejected edge in the
    /// transition trace, and returns the error.
    pub async fn update_local_state(
        &self,
        id: u32,
        command: SteeringCommand,
    ) -> Result<ServiceDescriptor> {
        let mut inner = self.inner.lock().await;
        let index = inner
            .components
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let name = inner.components[index].name.clone();
        let current = inner.components[index]
            .current_state
            .ok_or(Error::Stateless(name.clone()))?;

        match next_local_state(current, command) {
            Some(next) => {
                debug!("{}: {} -> {} on {}", name, current, next, command);
                inner.components[index].current_state = Some(next);
                inner.local_history.push(LocalStateTransition {
                    state_before: current,
                    input_command: command,
                    state_after: next,
                });
                Ok(inner.components[index].clone())
            }
            None => {
                error!(
                    "{}: illegal transition from {} on {}, descriptor goes to ERROR",
                    name, current, command
                );
                inner.components[index].current_state = Some(LifecycleState::Error);
                inner.local_history.push(LocalStateTransition {
                    state_before: current,
                    input_command: command,
                    state_after: LifecycleState::Error,
                });
                Err(Error::IllegalTransition(format!(
                    "{name}: {current} on {command}"
                )))
            }
        }
    }

    /// Re-derive the global state from the descriptor set and memoize
    /// it.
    ///
    /// Deterministic and idempotent: a second call with no intervening
    /// descriptor change neither moves the state nor grows the history.
    pub async fn update_global_state(&self) -> Result<LifecycleState> {
        let mut inner = self.inner.lock().await;
        let derived_status = derive_global_status(&inner.components);
        inner.health.current_global_status = derived_status;

        let Some(derived) = derive_global_state(&inner.components) else {
            return Ok(inner.health.current_global_state);
        };
        if derived == inner.health.current_global_state {
            debug!("global state already up to date: {}", derived);
            return Ok(derived);
        }
        info!(
            "global state {} -> {}",
            inner.health.current_global_state, derived
        );
        inner.health.current_global_state = derived;
        inner.health.last_updated = Utc::now();
        inner.global_history.push(derived);
        Ok(derived)
    }

    /// The memoized global state.
    pub async fn current_global_state(&self) -> LifecycleState {
        let inner = self.inner.lock().await;
        inner.health.current_global_state
    }

    /// The memoized global status.
    pub async fn current_global_status(&self) -> ServiceStatus {
        let inner = self.inner.lock().await;
        inner.health.current_global_status
    }

    /// Time elapsed since the registry was created. Non-decreasing for
    /// the registry's whole life.
    pub async fn system_uptime(&self) -> std::time::Duration {
        let inner = self.inner.lock().await;
        (Utc::now() - inner.health.uptime)
            .to_std()
            .unwrap_or_default()
    }

    /// The append-only local transition trace.
    pub async fn local_state_transition_history(&self) -> Vec<LocalStateTransition> {
        let inner = self.inner.lock().await;
        inner.local_history.clone()
    }

    /// The append-only global transition trace.
    pub async fn global_state_transition_history(&self) -> Vec<LifecycleState> {
        let inner = self.inner.lock().await;
        inner.global_history.clone()
    }

    /// Mark the registry stopped. The hosting server drains out once
    /// this is set.
    pub fn stop(&self) {
        info!("registry stop requested");
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}
