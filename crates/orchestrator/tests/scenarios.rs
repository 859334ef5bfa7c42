//! Scripted scenarios around the orchestrator: command validation,
//! START parameter distribution, emergency shutdown via the monitor.

use command_control::CommandControlService;
use control_core::{
    AckStatus, CommandParameters, CompanionReply, ControlCommand, ControlMessage, Event,
    LifecycleState, ServiceCategory, ServiceStatus, SimulatorInit, SteeringCommand,
};
use control_fabric::{QueuePair, ShutdownFlag};
use orchestrator::{Error, Orchestrator, OrchestratorConfig};
use service_registry::{
    ComponentEndpoint, HealthRegistry, MonitorConfig, RegistryApi, ServiceDescriptor,
};
use std::sync::Arc;
use std::time::Duration;

const COMPANION_ID: u32 = 42;

struct World {
    registry: Arc<HealthRegistry>,
    steering: QueuePair,
    companion: QueuePair,
    orchestrator_task: smol::Task<Result<(), Error>>,
    relay_task: smol::Task<Result<(), command_control::Error>>,
}

/// Registry + C&C + one hand-scripted companion + orchestrator.
async fn build_world(monitor: MonitorConfig) -> World {
    let registry = Arc::new(HealthRegistry::new());

    let (relay_half, relay_registered) = QueuePair::channel();
    let relay = CommandControlService::with_queues(
        1,
        registry.clone() as Arc<dyn RegistryApi>,
        relay_half,
        relay_registered,
        ShutdownFlag::new(),
    );
    let relay_task = smol::spawn(async move { relay.run().await });

    // The scripted companion: the test keeps one half, the relay
    // discovers the other through the registry.
    let (companion_half, relay_side) = QueuePair::channel();
    registry
        .register(ServiceDescriptor::stateful(
            COMPANION_ID,
            "sim-scripted",
            ServiceCategory::ApplicationCompanion,
            ComponentEndpoint::Queues(relay_side),
        ))
        .await
        .unwrap();

    let (steering_peer, orchestrator_steering) = QueuePair::channel();
    let orchestrator = Orchestrator::with_queues(
        OrchestratorConfig { id: 2 },
        registry.clone() as Arc<dyn RegistryApi>,
        orchestrator_steering,
        steering_peer.clone(),
        monitor,
        ShutdownFlag::new(),
    );
    let orchestrator_task = smol::spawn(async move { orchestrator.run().await });

    World {
        registry,
        steering: steering_peer,
        companion: companion_half,
        orchestrator_task,
        relay_task,
    }
}

fn patient_monitor() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_secs(3600),
        retries: 2,
    }
}

async fn issue(world: &World, command: SteeringCommand) {
    world
        .steering
        .send(&ControlMessage::Command(ControlCommand::bare(command)))
        .await
        .unwrap();
}

async fn ack(world: &World) -> AckStatus {
    match world
        .steering
        .recv_deadline(Duration::from_secs(10))
        .await
        .unwrap()
    {
        Some(ControlMessage::Ack(status)) => status,
        other => panic!("expected an acknowledgement, got {other:?}"),
    }
}

/// The scripted companion's INIT leg: update registry state, reply
/// with a step size.
async fn companion_serves_init(world: &World, init: SimulatorInit) {
    match world
        .companion
        .recv_deadline(Duration::from_secs(10))
        .await
        .unwrap()
    {
        Some(ControlMessage::Command(command)) => {
            assert_eq!(command.command, SteeringCommand::Init)
        }
        other => panic!("expected INIT, got {other:?}"),
    }
    world
        .registry
        .update_local_state(COMPANION_ID, SteeringCommand::Init)
        .await
        .unwrap();
    world
        .companion
        .send(&ControlMessage::Reply(CompanionReply::SimulatorInit(init)))
        .await
        .unwrap();
}

#[test]
fn start_before_init_is_rejected_without_broadcast() {
    smol::block_on(async {
        let world = build_world(patient_monitor()).await;

        // Give the orchestrator a beat to reach READY and derive the
        // global state.
        smol::Timer::after(Duration::from_millis(100)).await;
        world.registry.update_global_state().await.unwrap();

        issue(&world, SteeringCommand::Start).await;
        assert_eq!(ack(&world).await, AckStatus::Error);

        // Nothing reached the companion and the global state is
        // untouched.
        let broadcast = world
            .companion
            .recv_deadline(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(broadcast, None);
        assert_eq!(
            world.registry.current_global_state().await,
            LifecycleState::Ready
        );

        // The workflow is still alive: INIT proceeds normally.
        issue(&world, SteeringCommand::Init).await;
        companion_serves_init(
            &world,
            SimulatorInit {
                pid: 4711,
                local_minimum_step_size: 0.1,
                spike_detectors: None,
            },
        )
        .await;
        assert_eq!(ack(&world).await, AckStatus::Ok);
        assert_eq!(
            world.registry.current_global_state().await,
            LifecycleState::Synchronizing
        );
    });
}

#[test]
fn start_carries_the_negotiated_parameters() {
    smol::block_on(async {
        let world = build_world(patient_monitor()).await;
        smol::Timer::after(Duration::from_millis(100)).await;
        world.registry.update_global_state().await.unwrap();

        issue(&world, SteeringCommand::Init).await;
        companion_serves_init(
            &world,
            SimulatorInit {
                pid: 4711,
                local_minimum_step_size: 0.5,
                spike_detectors: Some(vec![7, 11]),
            },
        )
        .await;
        assert_eq!(ack(&world).await, AckStatus::Ok);

        // START must carry the negotiated minimum and the detector ids.
        issue(&world, SteeringCommand::Start).await;
        match world
            .companion
            .recv_deadline(Duration::from_secs(10))
            .await
            .unwrap()
        {
            Some(ControlMessage::Command(command)) => {
                assert_eq!(command.command, SteeringCommand::Start);
                match command.parameters {
                    Some(CommandParameters::Start {
                        global_minimum_step_size,
                        spike_detectors,
                    }) => {
                        assert_eq!(global_minimum_step_size, 0.5);
                        assert_eq!(spike_detectors, Some(vec![7, 11]));
                    }
                    other => panic!("expected START parameters, got {other:?}"),
                }
            }
            other => panic!("expected START, got {other:?}"),
        }
        world
            .registry
            .update_local_state(COMPANION_ID, SteeringCommand::Start)
            .await
            .unwrap();
        world
            .companion
            .send(&ControlMessage::Reply(CompanionReply::Ok))
            .await
            .unwrap();
        assert_eq!(ack(&world).await, AckStatus::Ok);

        // A PAUSE/RESUME round trips through the same validation.
        for (command, expected_state) in [
            (SteeringCommand::Pause, LifecycleState::Paused),
            (SteeringCommand::Resume, LifecycleState::Running),
        ] {
            issue(&world, command).await;
            match world
                .companion
                .recv_deadline(Duration::from_secs(10))
                .await
                .unwrap()
            {
                Some(ControlMessage::Command(received)) => {
                    assert_eq!(received.command, command)
                }
                other => panic!("expected {command:?}, got {other:?}"),
            }
            world
                .registry
                .update_local_state(COMPANION_ID, command)
                .await
                .unwrap();
            world
                .companion
                .send(&ControlMessage::Reply(CompanionReply::Ok))
                .await
                .unwrap();
            assert_eq!(ack(&world).await, AckStatus::Ok);
            assert_eq!(world.registry.current_global_state().await, expected_state);
        }

        // END concludes the run and stops the registry.
        issue(&world, SteeringCommand::End).await;
        match world
            .companion
            .recv_deadline(Duration::from_secs(10))
            .await
            .unwrap()
        {
            Some(ControlMessage::Command(command)) => {
                assert_eq!(command.command, SteeringCommand::End)
            }
            other => panic!("expected END, got {other:?}"),
        }
        world
            .registry
            .update_local_state(COMPANION_ID, SteeringCommand::End)
            .await
            .unwrap();
        world
            .companion
            .send(&ControlMessage::Reply(CompanionReply::Ok))
            .await
            .unwrap();
        assert_eq!(ack(&world).await, AckStatus::Ok);

        assert!(world.orchestrator_task.await.is_ok());
        assert!(world.relay_task.await.is_ok());
        assert!(world.registry.is_stopped());
        assert_eq!(
            world.registry.global_state_transition_history().await,
            vec![
                LifecycleState::Initializing,
                LifecycleState::Ready,
                LifecycleState::Synchronizing,
                LifecycleState::Running,
                LifecycleState::Paused,
                LifecycleState::Running,
                LifecycleState::Terminated,
            ]
        );
    });
}

#[test]
fn fatal_companion_reply_tears_the_workflow_down() {
    smol::block_on(async {
        let world = build_world(patient_monitor()).await;
        smol::Timer::after(Duration::from_millis(100)).await;
        world.registry.update_global_state().await.unwrap();

        issue(&world, SteeringCommand::Init).await;
        match world
            .companion
            .recv_deadline(Duration::from_secs(10))
            .await
            .unwrap()
        {
            Some(ControlMessage::Command(_)) => {}
            other => panic!("expected INIT, got {other:?}"),
        }
        // The companion's state update failed on its side.
        world
            .companion
            .send(&ControlMessage::Reply(CompanionReply::Event(
                Event::StateUpdateFatal,
            )))
            .await
            .unwrap();

        assert_eq!(ack(&world).await, AckStatus::Error);
        assert!(matches!(
            world.orchestrator_task.await,
            Err(Error::Terminated(_))
        ));
        // C&C was told to terminate as well.
        assert!(world.relay_task.await.is_err());
        assert!(world.registry.is_stopped());
    });
}

#[test]
fn monitor_alarm_triggers_emergency_shutdown() {
    smol::block_on(async {
        let world = build_world(MonitorConfig {
            interval: Duration::from_millis(50),
            retries: 2,
        })
        .await;
        smol::Timer::after(Duration::from_millis(100)).await;
        world.registry.update_global_state().await.unwrap();

        issue(&world, SteeringCommand::Init).await;
        companion_serves_init(
            &world,
            SimulatorInit {
                pid: 4711,
                local_minimum_step_size: 0.1,
                spike_detectors: None,
            },
        )
        .await;
        assert_eq!(ack(&world).await, AckStatus::Ok);

        // Forcibly mark the companion DOWN; the monitor must catch the
        // persistent violation and fire the alarm after its re-checks.
        world
            .registry
            .update_status(COMPANION_ID, ServiceStatus::Down)
            .await
            .unwrap();

        // The orchestrator reacts by broadcasting FATAL through C&C.
        let received = world
            .companion
            .recv_deadline(Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(received, Some(ControlMessage::Event(Event::Fatal)));

        assert!(matches!(
            world.orchestrator_task.await,
            Err(Error::Terminated("monitor alarm"))
        ));
        assert!(world.relay_task.await.is_err());
        assert!(world.registry.is_stopped());
    });
}
