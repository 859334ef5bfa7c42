//! Application manager integration with shell payloads

use app_manager::{
    ApplicationManager, Error, ManagerConfig, MetricsSink, UsageSample, UsageSampler,
    UsageSummary,
};
use async_trait::async_trait;
use chrono::Utc;
use control_core::{
    ActionConfig, ActionKind, CommandParameters, ControlCommand, ControlMessage, Event,
    ManagerReply, SteeringCommand,
};
use control_fabric::shutdown::GracePeriod;
use control_fabric::{QueuePair, ShutdownFlag};
use futures::lock::Mutex;
use service_registry::{HealthRegistry, RegistryApi};
use std::sync::Arc;
use std::time::Duration;

struct FakeSampler;

#[async_trait]
impl UsageSampler for FakeSampler {
    async fn sample(&self, _pid: u32) -> std::io::Result<UsageSample> {
        Ok(UsageSample {
            cpu_percent: 10.0,
            rss_bytes: 1024,
            taken_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    summaries: Mutex<Vec<UsageSummary>>,
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn persist(&self, summary: &UsageSummary) -> std::io::Result<()> {
        self.summaries.lock().await.push(summary.clone());
        Ok(())
    }
}

fn shell_action(name: &str, kind: ActionKind, script: &str) -> ActionConfig {
    ActionConfig {
        name: name.to_string(),
        kind,
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

struct Harness {
    companion: QueuePair,
    shutdown: ShutdownFlag,
    sink: Arc<RecordingSink>,
    task: smol::Task<Result<(), Error>>,
}

fn start_manager(id: u32, action: ActionConfig) -> Harness {
    let shutdown = ShutdownFlag::new();
    let registry: Arc<dyn RegistryApi> = Arc::new(HealthRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let (manager_half, companion_half) = QueuePair::channel();
    let (registered_half, registered_peer) = QueuePair::channel();
    drop(registered_peer);
    let manager = ApplicationManager::with_queues(
        ManagerConfig {
            id,
            action,
            monitoring_enabled: true,
            grace: GracePeriod(Duration::from_millis(200)),
        },
        registry,
        manager_half,
        registered_half,
        shutdown.clone(),
        Arc::new(FakeSampler),
        sink.clone(),
    );
    let task = smol::spawn(async move { manager.run().await });
    Harness {
        companion: companion_half,
        shutdown,
        sink,
        task,
    }
}

async fn send_command(harness: &Harness, command: SteeringCommand) {
    harness
        .companion
        .send(&ControlMessage::Command(ControlCommand::bare(command)))
        .await
        .unwrap();
}

async fn expect_reply(harness: &Harness) -> ManagerReply {
    match harness.companion.recv(&harness.shutdown).await.unwrap() {
        ControlMessage::ManagerReply(reply) => reply,
        other => panic!("expected a manager reply, got {other:?}"),
    }
}

#[test]
fn simulator_lifecycle_happy_path() {
    smol::block_on(async {
        let action = shell_action(
            "sim-left",
            ActionKind::Simulator,
            "echo \"{'PID': 4711, 'LOCAL_MINIMUM_STEP_SIZE': 0.1}\"; read verb; echo \"stepping after $verb\"; exit 0",
        );
        let harness = start_manager(11, action);

        send_command(&harness, SteeringCommand::Init).await;
        match expect_reply(&harness).await {
            ManagerReply::SimulatorInit(init) => {
                assert_eq!(init.pid, 4711);
                assert_eq!(init.local_minimum_step_size, 0.1);
            }
            other => panic!("expected a simulator init reply, got {other:?}"),
        }

        send_command(&harness, SteeringCommand::Start).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);

        send_command(&harness, SteeringCommand::End).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);

        assert!(harness.task.await.is_ok());

        // Monitoring summaries were persisted for the captured PID.
        let summaries = harness.sink.summaries.lock().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].pid, 4711);
        assert_eq!(summaries[0].exit_status, Some(0));
    });
}

#[test]
fn hub_records_are_parsed_with_junk_around_them() {
    smol::block_on(async {
        let action = shell_action(
            "hub-a",
            ActionKind::InterscaleHub,
            "echo \"junk before {'PID': 9, 'DATA_EXCHANGE_DIRECTION': 'A_TO_B', 'MPI_CONNECTION_INFO': 'x', 'INTERCOMM_TYPE': 'sender'} junk between {'PID': 10, 'DATA_EXCHANGE_DIRECTION': 'B_TO_A', 'MPI_CONNECTION_INFO': 'y', 'INTERCOMM_TYPE': 'receiver'} tail\"; read verb; exit 0",
        );
        let harness = start_manager(12, action);

        send_command(&harness, SteeringCommand::Init).await;
        match expect_reply(&harness).await {
            ManagerReply::HubInit(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0].pid, 9);
                assert_eq!(records[1].pid, 10);
            }
            other => panic!("expected a hub init reply, got {other:?}"),
        }

        send_command(&harness, SteeringCommand::Start).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);
        send_command(&harness, SteeringCommand::End).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);
        assert!(harness.task.await.is_ok());
    });
}

#[test]
fn init_parameters_append_hub_endpoints_to_the_command_line() {
    smol::block_on(async {
        // The appended endpoint lands in the payload's argument list.
        let action = shell_action(
            "sim-right",
            ActionKind::Simulator,
            "echo \"connected to $0 {'PID': 4712, 'LOCAL_MINIMUM_STEP_SIZE': 0.25}\"; read verb; exit 0",
        );
        let harness = start_manager(13, action);

        harness
            .companion
            .send(&ControlMessage::Command(ControlCommand::with_parameters(
                SteeringCommand::Init,
                CommandParameters::Init {
                    hub_endpoints: vec![control_core::HubEndpointRecord {
                        pid: 9,
                        direction: control_core::ExchangeDirection::AToB,
                        intercomm: control_core::IntercommRole::Sender,
                        connection_info: "mpi-port-7".to_string(),
                    }],
                },
            )))
            .await
            .unwrap();
        match expect_reply(&harness).await {
            ManagerReply::SimulatorInit(init) => assert_eq!(init.pid, 4712),
            other => panic!("expected a simulator init reply, got {other:?}"),
        }

        send_command(&harness, SteeringCommand::Start).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);
        send_command(&harness, SteeringCommand::End).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);
        assert!(harness.task.await.is_ok());
    });
}

#[test]
fn stderr_only_payload_fails_init() {
    smol::block_on(async {
        let action = shell_action(
            "sim-broken",
            ActionKind::Simulator,
            "echo 'something went sideways' >&2; exit 0",
        );
        let harness = start_manager(14, action);

        send_command(&harness, SteeringCommand::Init).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Error);
        assert!(harness.task.await.is_err());
    });
}

#[test]
fn crashed_payload_is_reported_at_end() {
    smol::block_on(async {
        let action = shell_action(
            "sim-crash",
            ActionKind::Simulator,
            "echo \"{'PID': 4711, 'LOCAL_MINIMUM_STEP_SIZE': 0.1}\"; read verb; exit 137",
        );
        let harness = start_manager(15, action);

        send_command(&harness, SteeringCommand::Init).await;
        assert!(matches!(
            expect_reply(&harness).await,
            ManagerReply::SimulatorInit(_)
        ));

        // START itself completes; the failure surfaces at END.
        send_command(&harness, SteeringCommand::Start).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Ok);

        send_command(&harness, SteeringCommand::End).await;
        assert_eq!(expect_reply(&harness).await, ManagerReply::Error);
        assert!(matches!(
            harness.task.await,
            Err(Error::PayloadExited { code: Some(137) })
        ));
    });
}

#[test]
fn fatal_event_aborts_the_payload() {
    smol::block_on(async {
        let action = shell_action(
            "sim-long",
            ActionKind::Simulator,
            "echo \"{'PID': 4711, 'LOCAL_MINIMUM_STEP_SIZE': 0.1}\"; sleep 60",
        );
        let harness = start_manager(16, action);

        send_command(&harness, SteeringCommand::Init).await;
        assert!(matches!(
            expect_reply(&harness).await,
            ManagerReply::SimulatorInit(_)
        ));

        harness
            .companion
            .send(&ControlMessage::Event(Event::Fatal))
            .await
            .unwrap();
        assert!(matches!(harness.task.await, Err(Error::Terminated(_))));
    });
}
