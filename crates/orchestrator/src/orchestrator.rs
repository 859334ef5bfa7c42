//! The orchestration command loop

use crate::error::{Error, Result};
use control_core::{
    AckStatus, CommandParameters, CompanionReply, ControlCommand, ControlMessage, Event,
    LifecycleState, PortRange, ServiceCategory, SteeringCommand,
};
use control_fabric::{Duplex, QueuePair, RepEndpoint, ReqEndpoint, ShutdownFlag};
use futures::future::Either;
use service_registry::{
    ComponentEndpoint, HealthStatusMonitor, MonitorConfig, RegistryApi, ServiceDescriptor,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Poll backoff while waiting for C&C to register.
const DISCOVERY_BACKOFF: Duration = Duration::from_millis(100);

/// Static configuration of the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Registry id of the orchestrator
    pub id: u32,
}

/// The single steering authority.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<dyn RegistryApi>,
    steering_link: Duplex,
    endpoint: ComponentEndpoint,
    cc_link: Option<Duplex>,
    monitor: HealthStatusMonitor,
    alarm_rx: async_channel::Receiver<()>,
    monitor_task: Option<smol::Task<()>>,
    shutdown: ShutdownFlag,
    global_minimum_step_size: Option<f64>,
    spike_detectors: Option<Vec<u64>>,
    steering_history: Vec<SteeringCommand>,
    responses_received: Vec<Vec<CompanionReply>>,
}

impl Orchestrator {
    /// Single-host orchestrator over shared queues.
    ///
    /// `steering_half` receives front-end commands;
    /// `steering_peer_half` goes into the registry for the front-end to
    /// discover. The C&C edge is discovered from the registry at run
    /// time in both modes.
    pub fn with_queues(
        config: OrchestratorConfig,
        registry: Arc<dyn RegistryApi>,
        steering_half: QueuePair,
        steering_peer_half: QueuePair,
        monitor_config: MonitorConfig,
        shutdown: ShutdownFlag,
    ) -> Self {
        let (monitor, alarm_rx) = HealthStatusMonitor::new(registry.clone(), monitor_config);
        Self {
            config,
            registry,
            steering_link: Duplex::Queue(steering_half),
            endpoint: ComponentEndpoint::Queues(steering_peer_half),
            cc_link: None,
            monitor,
            alarm_rx,
            monitor_task: None,
            shutdown,
            global_minimum_step_size: None,
            spike_detectors: None,
            steering_history: Vec::new(),
            responses_received: Vec::new(),
        }
    }

    /// Distributed orchestrator: binds its steering-facing reply socket
    /// inside the port range.
    pub async fn bind(
        config: OrchestratorConfig,
        registry: Arc<dyn RegistryApi>,
        ip: IpAddr,
        range: PortRange,
        monitor_config: MonitorConfig,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        let rep = RepEndpoint::bind(ip, range).await?;
        let mut addresses = HashMap::new();
        addresses.insert(ServiceCategory::Steering, rep.local_addr());
        let (monitor, alarm_rx) = HealthStatusMonitor::new(registry.clone(), monitor_config);
        Ok(Self {
            config,
            registry,
            steering_link: Duplex::Reply(rep),
            endpoint: ComponentEndpoint::Sockets(addresses),
            cc_link: None,
            monitor,
            alarm_rx,
            monitor_task: None,
            shutdown,
            global_minimum_step_size: None,
            spike_detectors: None,
            steering_history: Vec::new(),
            responses_received: Vec::new(),
        })
    }

    /// Commands issued so far, in order.
    pub fn steering_history(&self) -> &[SteeringCommand] {
        &self.steering_history
    }

    /// Register, connect the C&C edge, validate the global state, start
    /// health monitoring, then command, control and coordinate until
    /// END or a fatal condition.
    pub async fn run(mut self) -> Result<()> {
        self.register().await?;
        self.connect_command_control().await?;

        if let Err(e) = self.registry.update_global_state().await {
            error!("error updating the global state: {}", e);
            return Err(self.teardown(Event::Fatal, "setup").await);
        }

        let monitor = self.monitor.clone();
        self.monitor_task = Some(smol::spawn(async move { monitor.run().await }));

        let outcome = self.command_control_and_coordinate().await;
        if let Some(task) = self.monitor_task.take() {
            self.monitor.finalize_monitoring();
            task.await;
        }
        outcome
    }

    async fn register(&mut self) -> Result<()> {
        let endpoint = std::mem::replace(&mut self.endpoint, ComponentEndpoint::None);
        self.registry
            .register(ServiceDescriptor::stateful(
                self.config.id,
                "orchestrator",
                ServiceCategory::Orchestrator,
                endpoint,
            ))
            .await?;
        info!("orchestrator registered");
        Ok(())
    }

    /// Fetch the C&C endpoint from the registry and connect to it,
    /// polling while C&C is still coming up.
    async fn connect_command_control(&mut self) -> Result<()> {
        let link = loop {
            if self.shutdown.is_set() {
                return Err(Error::Terminated("shutdown"));
            }
            let services = self
                .registry
                .find_all_by_category(ServiceCategory::CommandControl)
                .await?;
            if let Some(service) = services.first() {
                match &service.endpoint {
                    ComponentEndpoint::Queues(pair) => break Duplex::Queue(pair.clone()),
                    endpoint => match endpoint.socket_for(ServiceCategory::Orchestrator) {
                        Some(addr) => break Duplex::Request(ReqEndpoint::connect(addr).await?),
                        None => {
                            return Err(Error::MissingEndpoint(
                                "command-control command socket".to_string(),
                            ));
                        }
                    },
                }
            }
            debug!("waiting for command and control to register");
            smol::Timer::after(DISCOVERY_BACKOFF).await;
        };
        self.cc_link = Some(link);
        info!("connected with command and control");
        Ok(())
    }

    async fn command_control_and_coordinate(&mut self) -> Result<()> {
        loop {
            // Race the steering edge against the monitor alarm; the
            // borrowed receive futures must be gone before teardown.
            let incoming = {
                let steering = self.steering_link.recv(&self.shutdown);
                futures::pin_mut!(steering);
                let alarm = self.alarm_rx.recv();
                futures::pin_mut!(alarm);
                match futures::future::select(steering, alarm).await {
                    Either::Left((message, _)) => Some(message?),
                    Either::Right((_, _)) => None,
                }
            };
            let Some(message) = incoming else {
                error!("health monitor alarm, initiating emergency shutdown");
                return Err(self.teardown(Event::Fatal, "monitor alarm").await);
            };

            let command = match message {
                ControlMessage::Command(command) => command,
                ControlMessage::Event(_) => {
                    error!("fatal event on the steering edge, quitting forcefully");
                    return Err(self.teardown(Event::Fatal, "FATAL").await);
                }
                other => return Err(Error::UnexpectedMessage(format!("{other:?}"))),
            };

            match self.execute_if_validated(command.command).await? {
                LoopStep::Continue => continue,
                LoopStep::Rejected => {
                    self.steering_link
                        .send(&ControlMessage::Ack(AckStatus::Error))
                        .await?;
                    continue;
                }
                LoopStep::Concluded => {
                    self.log_histories().await;
                    info!("stopping the registry");
                    if let Err(e) = self.registry.stop().await {
                        warn!("registry stop failed: {}", e);
                    }
                    info!("concluding orchestration");
                    self.steering_link
                        .send(&ControlMessage::Ack(AckStatus::Ok))
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    /// Execute one steering command against the validated global state.
    async fn execute_if_validated(&mut self, steering: SteeringCommand) -> Result<LoopStep> {
        // i. the global state must allow the command at all
        let Some(required) = required_global_state(steering) else {
            warn!("{} is not a workflow command", steering);
            return Ok(LoopStep::Rejected);
        };
        let current = self.registry.current_global_state().await?;
        if current != required {
            error!(
                "global state must be {} to execute {}, but is {}",
                required, steering, current
            );
            return Ok(LoopStep::Rejected);
        }

        // ii. apply the transition to our own descriptor first
        if let Err(e) = self
            .registry
            .update_local_state(self.config.id, steering)
            .await
        {
            error!("error updating the local state: {}", e);
            return Err(self.teardown(Event::StateUpdateFatal, "state update").await);
        }

        // iii. pack and send the control command, then wait for the
        // aggregated replies
        let command = self.pack_command(steering)?;
        self.send_to_command_control(&ControlMessage::Command(command))
            .await?;
        self.steering_history.push(steering);

        let replies = match self.recv_from_command_control().await? {
            ControlMessage::Replies(replies) => replies,
            other => {
                error!("unexpected aggregate from command and control: {:?}", other);
                return Err(self.teardown(Event::StateUpdateFatal, "bad aggregate").await);
            }
        };
        debug!("got {} replies", replies.len());

        // iv. any fatal element tears the workflow down
        if replies.iter().any(CompanionReply::is_fatal) {
            error!("fatal reply received, directing C&C to terminate");
            return Err(self.teardown(Event::StateUpdateFatal, "fatal reply").await);
        }

        // v. INIT negotiates the global minimum step size
        if steering == SteeringCommand::Init {
            if let Err(e) = self.process_init_replies(&replies) {
                error!("{}", e);
                return Err(self.teardown(Event::StateUpdateFatal, "step size").await);
            }
        }
        self.responses_received.push(replies);

        // vi. re-validate the global state
        if let Err(e) = self.registry.update_global_state().await {
            error!("error updating the global state: {}", e);
            return Err(self.teardown(Event::StateUpdateFatal, "global state").await);
        }
        info!(
            "global state now: {}",
            self.registry.current_global_state().await?
        );

        if steering == SteeringCommand::End {
            return Ok(LoopStep::Concluded);
        }
        self.steering_link
            .send(&ControlMessage::Ack(AckStatus::Ok))
            .await?;
        Ok(LoopStep::Continue)
    }

    fn pack_command(&self, steering: SteeringCommand) -> Result<ControlCommand> {
        if steering != SteeringCommand::Start {
            return Ok(ControlCommand::bare(steering));
        }
        let global_minimum_step_size =
            self.global_minimum_step_size.ok_or(Error::NoStepSize)?;
        Ok(ControlCommand::with_parameters(
            steering,
            CommandParameters::Start {
                global_minimum_step_size,
                spike_detectors: self.spike_detectors.clone(),
            },
        ))
    }

    /// Extract every simulator's local minimum step size and memoize
    /// the global minimum, plus spike-detector ids when one reply
    /// carries them.
    fn process_init_replies(&mut self, replies: &[CompanionReply]) -> Result<()> {
        let inits: Vec<_> = replies
            .iter()
            .filter_map(|reply| match reply {
                CompanionReply::SimulatorInit(init) => Some(init),
                _ => None,
            })
            .collect();
        if inits.is_empty() {
            return Err(Error::NoStepSize);
        }
        let minimum = inits
            .iter()
            .map(|init| init.local_minimum_step_size)
            .fold(f64::INFINITY, f64::min);
        if !minimum.is_finite() {
            return Err(Error::NoStepSize);
        }
        self.global_minimum_step_size = Some(minimum);
        info!("global minimum step size: {}", minimum);

        self.spike_detectors = inits
            .iter()
            .find_map(|init| init.spike_detectors.clone());
        match &self.spike_detectors {
            Some(ids) => info!("spike detector ids: {:?}", ids),
            None => debug!("spike detector ids are not shared"),
        }
        Ok(())
    }

    async fn send_to_command_control(&mut self, message: &ControlMessage) -> Result<()> {
        let link = self
            .cc_link
            .as_mut()
            .ok_or_else(|| Error::MissingEndpoint("command and control".to_string()))?;
        link.send(message).await?;
        Ok(())
    }

    async fn recv_from_command_control(&mut self) -> Result<ControlMessage> {
        let link = self
            .cc_link
            .as_mut()
            .ok_or_else(|| Error::MissingEndpoint("command and control".to_string()))?;
        Ok(link.recv(&self.shutdown).await?)
    }

    /// Tear the workflow down: emit the event to C&C, stop monitoring,
    /// stop the registry, and answer the front-end with an error. Every
    /// step is best-effort; the teardown itself must not get stuck.
    async fn teardown(&mut self, event: Event, reason: &'static str) -> Error {
        if let Some(link) = self.cc_link.as_mut() {
            if let Err(e) = link.send(&ControlMessage::Event(event)).await {
                warn!("could not send {:?} to command and control: {}", event, e);
            }
        }
        self.monitor.finalize_monitoring();
        if let Err(e) = self.registry.stop().await {
            warn!("registry stop failed: {}", e);
        }
        if let Err(e) = self
            .steering_link
            .send(&ControlMessage::Ack(AckStatus::Error))
            .await
        {
            debug!("no steering peer to answer: {}", e);
        }
        Error::Terminated(reason)
    }

    async fn log_histories(&self) {
        info!("steering commands history: {:?}", self.steering_history);
        info!("responses received: {:?}", self.responses_received);
        if let Ok(history) = self.registry.local_state_transition_history().await {
            info!("local state transition history: {:?}", history);
        }
        if let Ok(history) = self.registry.global_state_transition_history().await {
            info!("global state transition history: {:?}", history);
        }
        if let Ok(uptime) = self.registry.system_uptime().await {
            info!("uptime till now: {:?}", uptime);
        }
    }
}

enum LoopStep {
    Continue,
    Rejected,
    Concluded,
}

/// The global state a steering command requires.
fn required_global_state(command: SteeringCommand) -> Option<LifecycleState> {
    match command {
        SteeringCommand::Init => Some(LifecycleState::Ready),
        SteeringCommand::Start => Some(LifecycleState::Synchronizing),
        SteeringCommand::End => Some(LifecycleState::Running),
        SteeringCommand::Pause => Some(LifecycleState::Running),
        SteeringCommand::Resume => Some(LifecycleState::Paused),
        SteeringCommand::Exit => None,
    }
}
