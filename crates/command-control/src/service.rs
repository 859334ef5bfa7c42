//! The relay loop

use crate::error::{Error, Result};
use control_core::{
    CompanionReply, ControlMessage, Event, PortRange, ServiceCategory, SteeringCommand,
};
use control_fabric::{
    collect_in_arrival_order, Duplex, PubEndpoint, PullEndpoint, QueuePair, RepEndpoint,
    ShutdownFlag, STEERING_TOPIC,
};
use service_registry::{ComponentEndpoint, RegistryApi, ServiceDescriptor};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How the relay reaches the companions.
pub enum CompanionChannels {
    /// Single-host mode: companion queue halves are discovered from the
    /// registry at first use
    Queues {
        /// Cached companion halves, one per companion
        links: Vec<QueuePair>,
    },
    /// Distributed mode: broadcast socket plus a lazily connected
    /// reply puller
    Sockets {
        /// The companion-facing publish socket
        publisher: PubEndpoint,
        /// Reply fan-in, connected at the first collection
        puller: Option<PullEndpoint>,
    },
}

/// The Command & Control service.
pub struct CommandControlService {
    id: u32,
    registry: Arc<dyn RegistryApi>,
    orchestrator_link: Duplex,
    endpoint: ComponentEndpoint,
    channels: CompanionChannels,
    shutdown: ShutdownFlag,
}

impl CommandControlService {
    /// Single-host relay over shared queues.
    ///
    /// `orchestrator_half` is the relay's side of the orchestrator
    /// edge; `orchestrator_peer_half` goes into the registry so the
    /// orchestrator can discover it.
    pub fn with_queues(
        id: u32,
        registry: Arc<dyn RegistryApi>,
        orchestrator_half: QueuePair,
        orchestrator_peer_half: QueuePair,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            id,
            registry,
            orchestrator_link: Duplex::Queue(orchestrator_half),
            endpoint: ComponentEndpoint::Queues(orchestrator_peer_half),
            channels: CompanionChannels::Queues { links: Vec::new() },
            shutdown,
        }
    }

    /// Distributed relay: binds the orchestrator-facing reply socket
    /// and the companion-facing publish socket inside the port range.
    pub async fn bind(
        id: u32,
        registry: Arc<dyn RegistryApi>,
        ip: IpAddr,
        range: PortRange,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        let rep = RepEndpoint::bind(ip, range).await?;
        let publisher = PubEndpoint::bind(ip, range).await?;

        let mut addresses = HashMap::new();
        addresses.insert(ServiceCategory::Orchestrator, rep.local_addr());
        addresses.insert(ServiceCategory::ApplicationCompanion, publisher.local_addr());

        Ok(Self {
            id,
            registry,
            orchestrator_link: Duplex::Reply(rep),
            endpoint: ComponentEndpoint::Sockets(addresses),
            channels: CompanionChannels::Sockets {
                publisher,
                puller: None,
            },
            shutdown,
        })
    }

    /// Register with the registry and run the relay loop.
    pub async fn run(mut self) -> Result<()> {
        self.register().await?;
        self.channel_command_and_control().await
    }

    async fn register(&mut self) -> Result<()> {
        let endpoint = std::mem::replace(&mut self.endpoint, ComponentEndpoint::None);
        self.registry
            .register(ServiceDescriptor::stateless(
                self.id,
                "command-control",
                ServiceCategory::CommandControl,
                endpoint,
            ))
            .await?;
        info!("command and control service registered");
        Ok(())
    }

    async fn channel_command_and_control(&mut self) -> Result<()> {
        loop {
            // 1. fetch the next control command
            let message = self.orchestrator_link.recv(&self.shutdown).await?;
            let command = match message {
                ControlMessage::Event(Event::StateUpdateFatal) => {
                    error!("state update failure below, quitting forcefully");
                    return Err(Error::Terminated("STATE_UPDATE_FATAL"));
                }
                ControlMessage::Event(Event::Fatal) => {
                    error!("FATAL received, broadcasting and quitting forcefully");
                    self.broadcast_fatal().await;
                    return Err(Error::Terminated("FATAL"));
                }
                ControlMessage::Command(command) => command,
                other => {
                    return Err(Error::UnexpectedMessage(format!("{other:?}")));
                }
            };

            // 2. broadcast to every registered companion
            let expected = self.companion_count().await?;
            info!("broadcasting {} to {} companions", command.command, expected);
            self.broadcast(&ControlMessage::Command(command.clone()), expected)
                .await?;

            // 3. pull one reply per companion, in arrival order
            let replies = self.collect(expected).await?;
            debug!("collected {} replies", replies.len());

            // 4. hand the aggregated list back
            self.orchestrator_link
                .send(&ControlMessage::Replies(replies))
                .await?;

            // 5. END concludes the relay
            if command.command == SteeringCommand::End {
                info!("concluding command and control channelling");
                return Ok(());
            }
        }
    }

    async fn companion_count(&self) -> Result<usize> {
        Ok(self
            .registry
            .find_all_by_category(ServiceCategory::ApplicationCompanion)
            .await?
            .len())
    }

    async fn broadcast(&mut self, message: &ControlMessage, expected: usize) -> Result<()> {
        match &mut self.channels {
            CompanionChannels::Queues { links } => {
                if links.len() != expected {
                    *links = self
                        .registry
                        .find_all_by_category(ServiceCategory::ApplicationCompanion)
                        .await?
                        .iter()
                        .map(|companion| {
                            companion
                                .endpoint
                                .queue_pair()
                                .cloned()
                                .ok_or_else(|| Error::MissingEndpoint(companion.name.clone()))
                        })
                        .collect::<Result<Vec<_>>>()?;
                }
                for link in links.iter() {
                    link.send(message).await?;
                }
                Ok(())
            }
            CompanionChannels::Sockets { publisher, .. } => {
                publisher
                    .broadcast(STEERING_TOPIC, message, expected, &self.shutdown)
                    .await?;
                Ok(())
            }
        }
    }

    async fn broadcast_fatal(&mut self) {
        let expected = match self.companion_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("could not count companions for the FATAL broadcast: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .broadcast(&ControlMessage::Event(Event::Fatal), expected)
            .await
        {
            warn!("FATAL broadcast failed: {}", e);
        }
    }

    async fn collect(&mut self, expected: usize) -> Result<Vec<CompanionReply>> {
        let messages = match &mut self.channels {
            CompanionChannels::Queues { links } => {
                collect_in_arrival_order(links, expected, &self.shutdown).await?
            }
            CompanionChannels::Sockets { puller, .. } => {
                if puller.is_none() {
                    let companions = self
                        .registry
                        .find_all_by_category(ServiceCategory::ApplicationCompanion)
                        .await?;
                    let mut addrs = Vec::with_capacity(companions.len());
                    for companion in &companions {
                        let addr = companion
                            .endpoint
                            .socket_for(ServiceCategory::CommandControl)
                            .ok_or_else(|| Error::MissingEndpoint(companion.name.clone()))?;
                        addrs.push(addr);
                    }
                    info!("connecting reply fan-in to {} companions", addrs.len());
                    *puller = Some(PullEndpoint::connect(&addrs).await?);
                }
                match puller.as_mut() {
                    Some(pull) => pull.collect(expected, &self.shutdown).await?,
                    None => Vec::new(),
                }
            }
        };
        Ok(messages
            .into_iter()
            .map(|message| match message {
                ControlMessage::Reply(reply) => reply,
                ControlMessage::Event(event) => CompanionReply::Event(event),
                other => {
                    warn!("companion pushed an unexpected message: {:?}", other);
                    CompanionReply::Error
                }
            })
            .collect())
    }
}
