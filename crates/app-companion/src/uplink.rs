//! The companion's channel pair towards C&C

use crate::error::Result;
use control_core::ControlMessage;
use control_fabric::{PushEndpoint, QueuePair, ShutdownFlag, SubEndpoint};

/// Commands arrive by broadcast, replies leave by push.
pub enum CompanionUplink {
    /// Single-host mode: one shared queue pair carries both directions
    Queue(QueuePair),
    /// Distributed mode: subscription for commands, push for replies
    Sockets {
        /// Broadcast subscription on the `steering` topic
        subscription: SubEndpoint,
        /// Reply channel into the C&C fan-in
        push: PushEndpoint,
    },
}

impl CompanionUplink {
    /// Receive the next broadcast command.
    pub async fn recv_command(&mut self, shutdown: &ShutdownFlag) -> Result<ControlMessage> {
        let message = match self {
            CompanionUplink::Queue(pair) => pair.recv(shutdown).await?,
            CompanionUplink::Sockets { subscription, .. } => subscription.recv(shutdown).await?,
        };
        Ok(message)
    }

    /// Push one reply towards C&C.
    pub async fn push_reply(
        &mut self,
        message: &ControlMessage,
        shutdown: &ShutdownFlag,
    ) -> Result<()> {
        match self {
            CompanionUplink::Queue(pair) => pair.send(message).await?,
            CompanionUplink::Sockets { push, .. } => push.send(message, shutdown).await?,
        }
        Ok(())
    }
}
