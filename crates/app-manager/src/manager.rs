//! The application manager steering loop

use crate::error::{Error, Result};
use crate::monitor::{MetricsSink, ResourceUsageMonitor, UsageSampler, SAMPLE_INTERVAL};
use crate::parser::{parse_hub_records, parse_simulator_init, HUB_MARKER, SIMULATOR_MARKER};
use crate::runner::PayloadHandle;
use async_process::{ChildStderr, ChildStdout};
use control_core::{
    ActionConfig, ActionKind, CommandParameters, ControlMessage, ManagerReply, PortRange,
    ServiceCategory, SteeringCommand,
};
use control_fabric::shutdown::GracePeriod;
use control_fabric::{Duplex, QueuePair, RepEndpoint, ShutdownFlag};
use futures_lite::future;
use futures_lite::io::{AsyncBufReadExt, BufReader, Lines};
use futures_lite::stream::StreamExt;
use service_registry::{ComponentEndpoint, RegistryApi, ServiceDescriptor};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The steering verb written to the payload's stdin at START.
const START_VERB: &str = "START";

/// Poll cadence while scanning payload stdout.
const READ_POLL: Duration = Duration::from_millis(200);

/// Settle window after the protocol marker appeared, to catch records
/// split across consecutive writes.
const SETTLE_WINDOW: Duration = Duration::from_millis(100);

/// Static configuration of one application manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Registry id of this manager
    pub id: u32,
    /// The action this manager launches and owns
    pub action: ActionConfig,
    /// Whether resource-usage monitoring is on
    pub monitoring_enabled: bool,
    /// Graceful window granted before SIGKILL
    pub grace: GracePeriod,
}

/// Per-action payload supervisor.
pub struct ApplicationManager {
    config: ManagerConfig,
    registry: Arc<dyn RegistryApi>,
    companion_link: Duplex,
    endpoint: ComponentEndpoint,
    shutdown: ShutdownFlag,
    sampler: Arc<dyn UsageSampler>,
    sink: Arc<dyn MetricsSink>,
    payload: Option<PayloadHandle>,
    stdout_lines: Option<Lines<BufReader<ChildStdout>>>,
    stderr_task: Option<smol::Task<()>>,
    captured_pids: Vec<u32>,
    monitors: Vec<ResourceUsageMonitor>,
    exit_status: Option<i32>,
}

impl ApplicationManager {
    /// Single-host manager over shared queues.
    ///
    /// `companion_half` is the manager's side of the companion edge;
    /// `companion_peer_half` goes into the registry descriptor.
    pub fn with_queues(
        config: ManagerConfig,
        registry: Arc<dyn RegistryApi>,
        companion_half: QueuePair,
        companion_peer_half: QueuePair,
        shutdown: ShutdownFlag,
        sampler: Arc<dyn UsageSampler>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            registry,
            companion_link: Duplex::Queue(companion_half),
            endpoint: ComponentEndpoint::Queues(companion_peer_half),
            shutdown,
            sampler,
            sink,
            payload: None,
            stdout_lines: None,
            stderr_task: None,
            captured_pids: Vec::new(),
            monitors: Vec::new(),
            exit_status: None,
        }
    }

    /// Distributed manager: binds its companion-facing reply socket
    /// inside the port range.
    pub async fn bind(
        config: ManagerConfig,
        registry: Arc<dyn RegistryApi>,
        ip: IpAddr,
        range: PortRange,
        shutdown: ShutdownFlag,
        sampler: Arc<dyn UsageSampler>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let rep = RepEndpoint::bind(ip, range).await?;
        let mut addresses = HashMap::new();
        addresses.insert(ServiceCategory::ApplicationCompanion, rep.local_addr());
        Ok(Self {
            config,
            registry,
            companion_link: Duplex::Reply(rep),
            endpoint: ComponentEndpoint::Sockets(addresses),
            shutdown,
            sampler,
            sink,
            payload: None,
            stdout_lines: None,
            stderr_task: None,
            captured_pids: Vec::new(),
            monitors: Vec::new(),
            exit_status: None,
        })
    }

    /// Register with the registry and serve steering commands until
    /// END or a fatal event.
    pub async fn run(mut self) -> Result<()> {
        self.register().await?;
        loop {
            let message = self.companion_link.recv(&self.shutdown).await?;
            let command = match message {
                ControlMessage::Command(command) => command,
                ControlMessage::Event(_) => {
                    error!("fatal event received, quitting forcefully");
                    self.abort_payload().await;
                    return Err(Error::Terminated("FATAL"));
                }
                other => return Err(Error::UnexpectedMessage(format!("{other:?}"))),
            };
            let steering = command.command;
            info!("executing {}", steering);

            if let Err(e) = self
                .registry
                .update_local_state(self.config.id, steering)
                .await
            {
                error!("could not update state on {}: {}", steering, e);
                self.reply(ManagerReply::StateUpdateFatal).await?;
                self.abort_payload().await;
                return Err(e.into());
            }

            let outcome = match steering {
                SteeringCommand::Init => self.execute_init(command.parameters).await,
                SteeringCommand::Start => self.execute_start().await,
                SteeringCommand::End => self.execute_end().await,
                SteeringCommand::Pause | SteeringCommand::Resume | SteeringCommand::Exit => {
                    Ok(ManagerReply::Ok)
                }
            };

            match outcome {
                Ok(reply) => {
                    self.reply(reply).await?;
                    if steering == SteeringCommand::End {
                        info!("concluding execution");
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!("error executing {}: {}", steering, e);
                    self.reply(ManagerReply::Error).await?;
                    self.abort_payload().await;
                    return Err(e);
                }
            }
        }
    }

    async fn register(&mut self) -> Result<()> {
        let endpoint = std::mem::replace(&mut self.endpoint, ComponentEndpoint::None);
        let name = format!("{}-manager", self.config.action.name);
        self.registry
            .register(ServiceDescriptor::stateful(
                self.config.id,
                name,
                ServiceCategory::ApplicationManager,
                endpoint,
            ))
            .await?;
        info!("application manager for {:?} registered", self.config.action.name);
        Ok(())
    }

    async fn reply(&mut self, reply: ManagerReply) -> Result<()> {
        self.companion_link
            .send(&ControlMessage::ManagerReply(reply))
            .await?;
        Ok(())
    }

    async fn abort_payload(&mut self) {
        if let Some(mut payload) = self.payload.take() {
            if let Err(e) = payload.stop_preemptory(self.config.grace).await {
                error!("payload could not be terminated: {}", e);
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.cancel().await;
        }
    }

    /// INIT: launch the payload and scan stdout for its structured
    /// response.
    async fn execute_init(
        &mut self,
        parameters: Option<CommandParameters>,
    ) -> Result<ManagerReply> {
        // Hub connection endpoints discovered by the companion are
        // appended to the payload's argument list.
        let extra_args: Vec<String> = match parameters {
            Some(CommandParameters::Init { hub_endpoints }) => hub_endpoints
                .iter()
                .map(|record| record.connection_info.clone())
                .collect(),
            _ => Vec::new(),
        };

        let mut payload = PayloadHandle::spawn(&self.config.action, &extra_args)?;
        let stdout = payload.take_stdout().ok_or_else(|| Error::LaunchFailed {
            reason: "payload stdout is not captured".to_string(),
        })?;
        self.stdout_lines = Some(BufReader::new(stdout).lines());
        if let Some(stderr) = payload.take_stderr() {
            self.stderr_task = Some(spawn_stderr_logger(
                self.config.action.name.clone(),
                stderr,
            ));
        }
        self.payload = Some(payload);

        let marker = match self.config.action.kind {
            ActionKind::Simulator => SIMULATOR_MARKER,
            ActionKind::InterscaleHub => HUB_MARKER,
        };
        let output = self.read_stdout_until_marker(marker).await?;

        match self.config.action.kind {
            ActionKind::Simulator => {
                let init = parse_simulator_init(&output)?;
                self.captured_pids = vec![init.pid];
                Ok(ManagerReply::SimulatorInit(init))
            }
            ActionKind::InterscaleHub => {
                let records = parse_hub_records(&output)?;
                self.captured_pids = records.iter().map(|record| record.pid).collect();
                Ok(ManagerReply::HubInit(records))
            }
        }
    }

    /// START: monitor every captured PID, hand the steering verb to the
    /// payload, and drain its streams until it exits.
    async fn execute_start(&mut self) -> Result<ManagerReply> {
        if self.config.monitoring_enabled {
            info!("starting monitoring for pids {:?}", self.captured_pids);
            for pid in &self.captured_pids {
                self.monitors.push(ResourceUsageMonitor::start(
                    *pid,
                    self.sampler.clone(),
                    SAMPLE_INTERVAL,
                ));
            }
        }

        let payload = self.payload.as_mut().ok_or_else(|| {
            Error::UnexpectedMessage("START with no launched payload".to_string())
        })?;
        payload.write_stdin_line(START_VERB).await?;

        // Drain stdout to the log until the payload closes it.
        if let Some(lines) = self.stdout_lines.as_mut() {
            loop {
                if self.shutdown.is_set() {
                    return Err(Error::Terminated("shutdown"));
                }
                let next = future::or(
                    async { Some(lines.next().await) },
                    async {
                        smol::Timer::after(READ_POLL).await;
                        None
                    },
                )
                .await;
                match next {
                    Some(Some(Ok(line))) => info!("{}: {}", self.config.action.name, line),
                    Some(Some(Err(e))) => return Err(e.into()),
                    Some(None) => break,
                    None => continue,
                }
            }
        }

        let status = payload.wait().await?;
        self.exit_status = status.code();
        info!(
            "{} finished with {:?}",
            self.config.action.name, self.exit_status
        );

        // Conclude monitoring and delegate persistence.
        let monitors = std::mem::take(&mut self.monitors);
        for monitor in monitors {
            let summary = monitor.conclude(self.exit_status).await;
            if let Err(e) = self.sink.persist(&summary).await {
                warn!("could not persist usage summary for {}: {}", summary.pid, e);
            }
        }
        Ok(ManagerReply::Ok)
    }

    /// END: verify the payload exited cleanly.
    async fn execute_end(&mut self) -> Result<ManagerReply> {
        let code = match self.exit_status {
            Some(code) => Some(code),
            None => match self.payload.as_mut() {
                Some(payload) => payload.try_status()?.and_then(|status| status.code()),
                None => None,
            },
        };
        if code == Some(0) {
            info!("{} finished properly", self.config.action.name);
            Ok(ManagerReply::Ok)
        } else {
            Err(Error::PayloadExited { code })
        }
    }

    /// Scan payload stdout until the protocol marker shows up, logging
    /// everything read. Stderr noise is logged by its own worker and
    /// never fails the scan; the payload exiting without a marker does.
    async fn read_stdout_until_marker(&mut self, marker: &str) -> Result<String> {
        let lines = self
            .stdout_lines
            .as_mut()
            .ok_or_else(|| Error::LaunchFailed {
                reason: "payload stdout is not captured".to_string(),
            })?;
        let mut output = String::new();
        loop {
            if self.shutdown.is_set() {
                return Err(Error::Terminated("shutdown"));
            }
            let next = future::or(
                async { Some(lines.next().await) },
                async {
                    smol::Timer::after(READ_POLL).await;
                    None
                },
            )
            .await;
            match next {
                Some(Some(Ok(line))) => {
                    info!("{}: {}", self.config.action.name, line);
                    output.push_str(&line);
                    output.push('\n');
                    if output.contains(marker) {
                        // Catch trailing records written moments later.
                        loop {
                            let extra = future::or(
                                async { Some(lines.next().await) },
                                async {
                                    smol::Timer::after(SETTLE_WINDOW).await;
                                    None
                                },
                            )
                            .await;
                            match extra {
                                Some(Some(Ok(line))) => {
                                    output.push_str(&line);
                                    output.push('\n');
                                }
                                _ => break,
                            }
                        }
                        return Ok(output);
                    }
                }
                Some(Some(Err(e))) => return Err(e.into()),
                Some(None) => {
                    let code = match self.payload.as_mut() {
                        Some(payload) => payload.wait().await?.code(),
                        None => None,
                    };
                    return Err(Error::PayloadExited { code });
                }
                None => continue,
            }
        }
    }
}

fn spawn_stderr_logger(name: String, stderr: ChildStderr) -> smol::Task<()> {
    smol::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => warn!("{} stderr: {}", name, line),
                Err(_) => break,
            }
        }
    })
}
