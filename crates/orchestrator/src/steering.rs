//! Steering front-end client
//!
//! A thin request/reply driver for the orchestrator, usable from an
//! interactive menu or a script. Commands are validated client-side
//! against the legitimate next workflow step before they are sent;
//! this is a usability check only, the state machine in the registry
//! stays authoritative.

use crate::error::{Error, Result};
use control_core::{AckStatus, ControlCommand, ControlMessage, ServiceCategory, SteeringCommand};
use control_fabric::{Duplex, QueuePair, ReqEndpoint, ShutdownFlag};
use service_registry::{ComponentEndpoint, RegistryApi};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Poll backoff while waiting for the orchestrator to register.
const DISCOVERY_BACKOFF: Duration = Duration::from_millis(100);

/// Steering front-end: issues commands, awaits acknowledgements.
pub struct SteeringClient {
    link: Duplex,
    shutdown: ShutdownFlag,
    history: Vec<SteeringCommand>,
    legitimate_next: SteeringCommand,
}

impl SteeringClient {
    /// Single-host client over the orchestrator's registered queue
    /// pair.
    pub fn with_queues(link: QueuePair, shutdown: ShutdownFlag) -> Self {
        Self {
            link: Duplex::Queue(link),
            shutdown,
            history: Vec::new(),
            legitimate_next: SteeringCommand::Init,
        }
    }

    /// Discover the orchestrator through the registry and connect,
    /// whichever deployment mode it registered for.
    pub async fn connect(registry: Arc<dyn RegistryApi>, shutdown: ShutdownFlag) -> Result<Self> {
        let link = loop {
            if shutdown.is_set() {
                return Err(Error::Terminated("shutdown"));
            }
            let services = registry
                .find_all_by_category(ServiceCategory::Orchestrator)
                .await?;
            if let Some(service) = services.first() {
                match &service.endpoint {
                    ComponentEndpoint::Queues(pair) => break Duplex::Queue(pair.clone()),
                    endpoint => match endpoint.socket_for(ServiceCategory::Steering) {
                        Some(addr) => break Duplex::Request(ReqEndpoint::connect(addr).await?),
                        None => {
                            return Err(Error::MissingEndpoint(
                                "orchestrator steering socket".to_string(),
                            ));
                        }
                    },
                }
            }
            debug!("waiting for the orchestrator to register");
            smol::Timer::after(DISCOVERY_BACKOFF).await;
        };
        info!("steering connected with the orchestrator");
        Ok(Self {
            link,
            shutdown,
            history: Vec::new(),
            legitimate_next: SteeringCommand::Init,
        })
    }

    /// Commands issued so far.
    pub fn history(&self) -> &[SteeringCommand] {
        &self.history
    }

    /// Issue one steering command and await the orchestrator's
    /// acknowledgement.
    ///
    /// END is always a legitimate choice; everything else must be the
    /// next step of the workflow.
    pub async fn execute(&mut self, command: SteeringCommand) -> Result<AckStatus> {
        if command != self.legitimate_next && command != SteeringCommand::End {
            return Err(Error::InvalidCommand(format!(
                "{command} is not a legitimate choice, expected {} or END",
                self.legitimate_next
            )));
        }
        self.link
            .send(&ControlMessage::Command(ControlCommand::bare(command)))
            .await?;
        self.history.push(command);

        let ack = match self.link.recv(&self.shutdown).await? {
            ControlMessage::Ack(ack) => ack,
            ControlMessage::Event(_) => return Err(Error::Terminated("FATAL")),
            other => return Err(Error::UnexpectedMessage(format!("{other:?}"))),
        };
        if ack == AckStatus::Ok {
            self.legitimate_next = next_workflow_step(command);
        } else {
            error!("error executing {}", command);
        }
        Ok(ack)
    }

    /// Drive the whole INIT → START → END workflow, stopping at the
    /// first error.
    pub async fn run_workflow(&mut self) -> Result<()> {
        for command in [
            SteeringCommand::Init,
            SteeringCommand::Start,
            SteeringCommand::End,
        ] {
            if self.execute(command).await? == AckStatus::Error {
                return Err(Error::Terminated("command failure"));
            }
        }
        Ok(())
    }
}

fn next_workflow_step(after: SteeringCommand) -> SteeringCommand {
    match after {
        SteeringCommand::Init => SteeringCommand::Start,
        SteeringCommand::Start => SteeringCommand::End,
        SteeringCommand::Pause => SteeringCommand::Resume,
        SteeringCommand::Resume => SteeringCommand::End,
        SteeringCommand::End | SteeringCommand::Exit => SteeringCommand::Exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_steps_advance_in_order() {
        assert_eq!(next_workflow_step(SteeringCommand::Init), SteeringCommand::Start);
        assert_eq!(next_workflow_step(SteeringCommand::Start), SteeringCommand::End);
        assert_eq!(next_workflow_step(SteeringCommand::Pause), SteeringCommand::Resume);
    }

    #[test]
    fn out_of_order_commands_are_rejected_client_side() {
        smol::block_on(async {
            let (near, _far) = QueuePair::channel();
            let mut client = SteeringClient::with_queues(near, ShutdownFlag::new());
            let result = client.execute(SteeringCommand::Start).await;
            assert!(matches!(result, Err(Error::InvalidCommand(_))));
            assert!(client.history().is_empty());
        });
    }
}
