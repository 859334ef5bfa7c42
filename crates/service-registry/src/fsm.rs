//! Workflow state transition rules
//!
//! The permitted local transitions form the complete graph of legal
//! workflow moves; every other (state, command) pair is illegal and
//! drives the descriptor to ERROR. The global state is never stored on
//! its own authority: it is derived from the descriptor set and only
//! memoized for the monitor's benefit.

use crate::models::ServiceDescriptor;
use control_core::{LifecycleState, ServiceStatus, SteeringCommand};

/// The next legal local state for a (state, command) pair, or `None`
/// when the pair is illegal.
pub fn next_local_state(
    current: LifecycleState,
    command: SteeringCommand,
) -> Option<LifecycleState> {
    use LifecycleState::*;

    match (current, command) {
        (Ready, SteeringCommand::Init) => Some(Synchronizing),
        (Synchronizing, SteeringCommand::Start) => Some(Running),
        (Running, SteeringCommand::Pause) => Some(Paused),
        (Running, SteeringCommand::End) => Some(Terminated),
        (Paused, SteeringCommand::Resume) => Some(Running),
        _ => None,
    }
}

/// Derive the global state from the descriptor set.
///
/// Two constraints are checked: (C1) every descriptor has status UP,
/// and (C2) all stateful descriptors share one local state. Both hold:
/// the global state is that shared state. Either fails: ERROR. With no
/// stateful descriptor registered yet there is nothing to derive and
/// `None` is returned, leaving the memoized state untouched.
pub fn derive_global_state(descriptors: &[ServiceDescriptor]) -> Option<LifecycleState> {
    if descriptors.is_empty() {
        return None;
    }
    if !descriptors
        .iter()
        .all(|d| d.current_status == ServiceStatus::Up)
    {
        return Some(LifecycleState::Error);
    }
    let mut stateful = descriptors.iter().filter_map(|d| d.current_state);
    let first = stateful.next()?;
    if stateful.all(|state| state == first) {
        Some(first)
    } else {
        Some(LifecycleState::Error)
    }
}

/// Derive the global status: UP only while every descriptor is UP.
pub fn derive_global_status(descriptors: &[ServiceDescriptor]) -> ServiceStatus {
    if descriptors
        .iter()
        .all(|d| d.current_status == ServiceStatus::Up)
    {
        ServiceStatus::Up
    } else {
        ServiceStatus::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComponentEndpoint;
    use control_core::ServiceCategory;

    fn stateful(id: u32, state: LifecycleState) -> ServiceDescriptor {
        let mut descriptor = ServiceDescriptor::stateful(
            id,
            format!("component-{id}"),
            ServiceCategory::ApplicationCompanion,
            ComponentEndpoint::None,
        );
        descriptor.current_state = Some(state);
        descriptor
    }

    fn stateless(id: u32) -> ServiceDescriptor {
        ServiceDescriptor::stateless(
            id,
            format!("component-{id}"),
            ServiceCategory::CommandControl,
            ComponentEndpoint::None,
        )
    }

    #[test]
    fn legal_transitions_follow_the_rule_table() {
        use LifecycleState::*;
        assert_eq!(next_local_state(Ready, SteeringCommand::Init), Some(Synchronizing));
        assert_eq!(next_local_state(Synchronizing, SteeringCommand::Start), Some(Running));
        assert_eq!(next_local_state(Running, SteeringCommand::Pause), Some(Paused));
        assert_eq!(next_local_state(Running, SteeringCommand::End), Some(Terminated));
        assert_eq!(next_local_state(Paused, SteeringCommand::Resume), Some(Running));
    }

    #[test]
    fn every_other_pair_is_illegal() {
        use LifecycleState::*;
        assert_eq!(next_local_state(Ready, SteeringCommand::Start), None);
        assert_eq!(next_local_state(Running, SteeringCommand::Init), None);
        assert_eq!(next_local_state(Terminated, SteeringCommand::End), None);
        assert_eq!(next_local_state(Error, SteeringCommand::Init), None);
        assert_eq!(next_local_state(Paused, SteeringCommand::Pause), None);
        assert_eq!(next_local_state(Initializing, SteeringCommand::Init), None);
    }

    #[test]
    fn shared_state_becomes_the_global_state() {
        let descriptors = vec![
            stateful(1, LifecycleState::Running),
            stateless(2),
            stateful(3, LifecycleState::Running),
        ];
        assert_eq!(derive_global_state(&descriptors), Some(LifecycleState::Running));
    }

    #[test]
    fn mixed_states_derive_error() {
        let descriptors = vec![
            stateful(1, LifecycleState::Running),
            stateful(2, LifecycleState::Ready),
        ];
        assert_eq!(derive_global_state(&descriptors), Some(LifecycleState::Error));
    }

    #[test]
    fn any_down_status_derives_error() {
        let mut down = stateful(2, LifecycleState::Running);
        down.current_status = ServiceStatus::Down;
        let descriptors = vec![stateful(1, LifecycleState::Running), down];
        assert_eq!(derive_global_state(&descriptors), Some(LifecycleState::Error));
        assert_eq!(derive_global_status(&descriptors), ServiceStatus::Down);
    }

    #[test]
    fn stateless_only_set_derives_nothing() {
        let descriptors = vec![stateless(1)];
        assert_eq!(derive_global_state(&descriptors), None);
    }
}
