//! The companion steering loop

use crate::affinity::CpuPinner;
use crate::error::{Error, Result};
use crate::launcher::ManagerLauncher;
use crate::uplink::CompanionUplink;
use control_core::{
    ActionConfig, ActionKind, CommandParameters, CompanionReply, ControlCommand, ControlMessage,
    Event, HubEndpointRecord, ManagerReply, PortRange, ServiceCategory, SteeringCommand,
};
use control_fabric::{
    Duplex, PushEndpoint, QueuePair, ReqEndpoint, ShutdownFlag, SubEndpoint, STEERING_TOPIC,
};
use service_registry::{ComponentEndpoint, RegistryApi, ServiceDescriptor};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Poll backoff while waiting for hub endpoint records.
const HUB_POLL_BACKOFF: Duration = Duration::from_millis(100);

/// Poll backoff while waiting for peers to register.
const DISCOVERY_BACKOFF: Duration = Duration::from_millis(100);

/// Static configuration of one application companion.
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// Registry id of this companion
    pub id: u32,
    /// The action this companion supervises
    pub action: ActionConfig,
    /// How many hub endpoint records a simulator must discover before
    /// forwarding INIT
    pub expected_hubs: usize,
    /// Designated CPU for the companion process
    pub pin_to_cpu: usize,
}

/// Per-action control-plane supervisor.
pub struct ApplicationCompanion {
    config: CompanionConfig,
    registry: Arc<dyn RegistryApi>,
    uplink: CompanionUplink,
    endpoint: ComponentEndpoint,
    manager_link: Option<Duplex>,
    launcher: Arc<dyn ManagerLauncher>,
    pinner: Arc<dyn CpuPinner>,
    shutdown: ShutdownFlag,
}

impl ApplicationCompanion {
    /// Single-host companion over shared queues.
    ///
    /// `uplink_half` receives broadcasts; `uplink_peer_half` goes into
    /// the registry for C&C to discover; `manager_link` is the
    /// companion's side of the manager edge.
    #[allow(clippy::too_many_arguments)]
    pub fn with_queues(
        config: CompanionConfig,
        registry: Arc<dyn RegistryApi>,
        uplink_half: QueuePair,
        uplink_peer_half: QueuePair,
        manager_link: QueuePair,
        launcher: Arc<dyn ManagerLauncher>,
        pinner: Arc<dyn CpuPinner>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            registry,
            uplink: CompanionUplink::Queue(uplink_half),
            endpoint: ComponentEndpoint::Queues(uplink_peer_half),
            manager_link: Some(Duplex::Queue(manager_link)),
            launcher,
            pinner,
            shutdown,
        }
    }

    /// Distributed companion: subscribes to the C&C broadcast and binds
    /// its reply push socket inside the port range. The manager's
    /// request channel is connected after launch, once the manager has
    /// registered its own endpoint.
    pub async fn connect(
        config: CompanionConfig,
        registry: Arc<dyn RegistryApi>,
        ip: IpAddr,
        range: PortRange,
        launcher: Arc<dyn ManagerLauncher>,
        pinner: Arc<dyn CpuPinner>,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        // C&C registers before any companion starts, per launch order.
        let broadcast_addr = discover_command_control(&registry, &shutdown).await?;
        let subscription = SubEndpoint::connect(broadcast_addr, STEERING_TOPIC).await?;
        let push = PushEndpoint::bind(ip, range).await?;

        let mut addresses = HashMap::new();
        addresses.insert(ServiceCategory::CommandControl, push.local_addr());

        Ok(Self {
            config,
            registry,
            uplink: CompanionUplink::Sockets { subscription, push },
            endpoint: ComponentEndpoint::Sockets(addresses),
            manager_link: None,
            launcher,
            pinner,
            shutdown,
        })
    }

    /// Set up the runtime and serve steering commands until END or a
    /// fatal event. On failure the companion raises SIGTERM against
    /// itself after reporting upstream.
    pub async fn run(mut self) -> Result<()> {
        // CPU pinning keeps the companion off the payload's cores;
        // failing to pin is not worth dying for.
        if let Err(e) = self.pinner.pin(std::process::id(), self.config.pin_to_cpu) {
            warn!("could not pin to cpu {}: {}", self.config.pin_to_cpu, e);
        }

        self.launcher
            .launch()
            .await
            .map_err(|e| Error::ManagerLaunch(e.to_string()))?;
        self.connect_manager().await?;
        self.register().await?;

        match self.steering_loop().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("terminating with error: {}", e);
                self.shutdown.raise_term();
                Err(e)
            }
        }
    }

    async fn connect_manager(&mut self) -> Result<()> {
        if self.manager_link.is_some() {
            return Ok(());
        }
        let manager_name = format!("{}-manager", self.config.action.name);
        let addr = loop {
            if self.shutdown.is_set() {
                return Err(Error::Terminated("shutdown"));
            }
            if let Some(descriptor) = self.registry.find_by_name(&manager_name).await? {
                match descriptor
                    .endpoint
                    .socket_for(ServiceCategory::ApplicationCompanion)
                {
                    Some(addr) => break addr,
                    None => return Err(Error::MissingEndpoint(manager_name)),
                }
            }
            debug!("waiting for {} to register", manager_name);
            smol::Timer::after(DISCOVERY_BACKOFF).await;
        };
        self.manager_link = Some(Duplex::Request(ReqEndpoint::connect(addr).await?));
        Ok(())
    }

    async fn register(&mut self) -> Result<()> {
        let endpoint = std::mem::replace(&mut self.endpoint, ComponentEndpoint::None);
        self.registry
            .register(ServiceDescriptor::stateful(
                self.config.id,
                self.config.action.name.clone(),
                ServiceCategory::ApplicationCompanion,
                endpoint,
            ))
            .await?;
        info!("application companion {:?} registered", self.config.action.name);
        Ok(())
    }

    async fn steering_loop(&mut self) -> Result<()> {
        loop {
            let message = self.uplink.recv_command(&self.shutdown).await?;
            let command = match message {
                ControlMessage::Command(command) => command,
                ControlMessage::Event(_) => {
                    error!("fatal event received, quitting forcefully");
                    return Err(Error::Terminated("FATAL"));
                }
                other => return Err(Error::UnexpectedMessage(format!("{other:?}"))),
            };
            info!("executing {}", command.command);
            match command.command {
                SteeringCommand::Init => self.execute_init().await?,
                SteeringCommand::End => {
                    self.execute_forward(command).await?;
                    info!("concluding application companion");
                    return Ok(());
                }
                SteeringCommand::Start | SteeringCommand::Pause | SteeringCommand::Resume => {
                    self.execute_forward(command).await?;
                }
                SteeringCommand::Exit => {
                    warn!("EXIT is not part of the workflow path, ignoring");
                }
            }
        }
    }

    /// INIT: discover hub endpoints first when supervising a
    /// simulator; register the produced endpoints when supervising a
    /// hub.
    async fn execute_init(&mut self) -> Result<()> {
        self.update_state(SteeringCommand::Init).await?;

        let parameters = match self.config.action.kind {
            ActionKind::Simulator => Some(CommandParameters::Init {
                hub_endpoints: self.await_hub_endpoints().await?,
            }),
            ActionKind::InterscaleHub => None,
        };
        self.send_to_manager(ControlCommand {
            command: SteeringCommand::Init,
            parameters,
        })
        .await?;

        match (self.config.action.kind, self.recv_manager_reply().await?) {
            (ActionKind::Simulator, ManagerReply::SimulatorInit(init)) => {
                self.push_reply(CompanionReply::SimulatorInit(init)).await
            }
            (ActionKind::InterscaleHub, ManagerReply::HubInit(records)) => {
                for record in records {
                    self.registry
                        .register(ServiceDescriptor::hub_endpoint(record))
                        .await?;
                }
                info!("hub endpoints registered");
                self.push_reply(CompanionReply::Empty).await
            }
            (_, ManagerReply::StateUpdateFatal) => {
                self.push_reply(CompanionReply::Event(Event::StateUpdateFatal))
                    .await?;
                Err(Error::ManagerFailed("INIT"))
            }
            (_, other) => {
                warn!("manager replied {:?} to INIT", other);
                self.push_reply(CompanionReply::Error).await?;
                Err(Error::ManagerFailed("INIT"))
            }
        }
    }

    /// START/PAUSE/RESUME/END: transition, forward verbatim, relay the
    /// outcome.
    async fn execute_forward(&mut self, command: ControlCommand) -> Result<()> {
        let steering = command.command;
        self.update_state(steering).await?;
        self.send_to_manager(command).await?;
        match self.recv_manager_reply().await? {
            ManagerReply::Ok => self.push_reply(CompanionReply::Ok).await,
            ManagerReply::StateUpdateFatal => {
                self.push_reply(CompanionReply::Event(Event::StateUpdateFatal))
                    .await?;
                Err(Error::ManagerFailed(steering_name(steering)))
            }
            other => {
                warn!("manager replied {:?} to {}", other, steering);
                self.push_reply(CompanionReply::Error).await?;
                Err(Error::ManagerFailed(steering_name(steering)))
            }
        }
    }

    async fn update_state(&mut self, command: SteeringCommand) -> Result<()> {
        if let Err(e) = self
            .registry
            .update_local_state(self.config.id, command)
            .await
        {
            error!("could not update state on {}: {}", command, e);
            self.push_reply(CompanionReply::Event(Event::StateUpdateFatal))
                .await?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Block until the registry holds the whole expected hub set,
    /// polling with a short backoff. There is no deadline: hubs can
    /// take arbitrarily long to come up.
    async fn await_hub_endpoints(&mut self) -> Result<Vec<HubEndpointRecord>> {
        loop {
            if self.shutdown.is_set() {
                return Err(Error::Terminated("shutdown"));
            }
            let hubs = self
                .registry
                .find_all_by_category(ServiceCategory::InterscaleHub)
                .await?;
            if hubs.len() >= self.config.expected_hubs {
                let records = hubs
                    .iter()
                    .filter_map(|descriptor| descriptor.endpoint.hub_record().cloned())
                    .collect();
                return Ok(records);
            }
            debug!(
                "waiting for hub endpoints: {} of {}",
                hubs.len(),
                self.config.expected_hubs
            );
            smol::Timer::after(HUB_POLL_BACKOFF).await;
        }
    }

    async fn send_to_manager(&mut self, command: ControlCommand) -> Result<()> {
        let link = self
            .manager_link
            .as_mut()
            .ok_or_else(|| Error::MissingEndpoint("application manager".to_string()))?;
        link.send(&ControlMessage::Command(command)).await?;
        Ok(())
    }

    async fn recv_manager_reply(&mut self) -> Result<ManagerReply> {
        let link = self
            .manager_link
            .as_mut()
            .ok_or_else(|| Error::MissingEndpoint("application manager".to_string()))?;
        match link.recv(&self.shutdown).await? {
            ControlMessage::ManagerReply(reply) => Ok(reply),
            ControlMessage::Event(_) => Err(Error::Terminated("FATAL")),
            other => Err(Error::UnexpectedMessage(format!("{other:?}"))),
        }
    }

    async fn push_reply(&mut self, reply: CompanionReply) -> Result<()> {
        self.uplink
            .push_reply(&ControlMessage::Reply(reply), &self.shutdown)
            .await
    }
}

async fn discover_command_control(
    registry: &Arc<dyn RegistryApi>,
    shutdown: &ShutdownFlag,
) -> Result<std::net::SocketAddr> {
    loop {
        if shutdown.is_set() {
            return Err(Error::Terminated("shutdown"));
        }
        let services = registry
            .find_all_by_category(ServiceCategory::CommandControl)
            .await?;
        if let Some(service) = services.first() {
            return service
                .endpoint
                .socket_for(ServiceCategory::ApplicationCompanion)
                .ok_or_else(|| Error::MissingEndpoint("command-control broadcast".to_string()));
        }
        smol::Timer::after(DISCOVERY_BACKOFF).await;
    }
}

fn steering_name(command: SteeringCommand) -> &'static str {
    match command {
        SteeringCommand::Init => "INIT",
        SteeringCommand::Start => "START",
        SteeringCommand::End => "END",
        SteeringCommand::Pause => "PAUSE",
        SteeringCommand::Resume => "RESUME",
        SteeringCommand::Exit => "EXIT",
    }
}
