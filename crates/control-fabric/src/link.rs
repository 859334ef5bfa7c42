//! Deployment-mode-polymorphic conduits
//!
//! Components talk to their peers through [`Duplex`] links so that the
//! steering logic is identical whether the workflow runs on a single
//! host (queues) or across nodes (sockets).

use crate::error::{Error, Result};
use crate::queue::QueuePair;
use crate::shutdown::ShutdownFlag;
use crate::socket::{RepEndpoint, ReqEndpoint};
use control_core::ControlMessage;
use futures::stream::{FuturesUnordered, StreamExt};
use futures_lite::future;
use std::time::Duration;

/// A bidirectional command/reply conduit to exactly one peer.
pub enum Duplex {
    /// Shared in-memory queue pair (single-host mode)
    Queue(QueuePair),
    /// Requesting side of a socket edge
    Request(ReqEndpoint),
    /// Replying side of a socket edge
    Reply(RepEndpoint),
}

impl Duplex {
    /// Send one message to the peer.
    pub async fn send(&mut self, message: &ControlMessage) -> Result<()> {
        match self {
            Duplex::Queue(pair) => pair.send(message).await,
            Duplex::Request(req) => req.send(message).await,
            Duplex::Reply(rep) => rep.send(message).await,
        }
    }

    /// Receive one message, surfacing a synthetic FATAL event once the
    /// shutdown flag is set.
    pub async fn recv(&mut self, shutdown: &ShutdownFlag) -> Result<ControlMessage> {
        match self {
            Duplex::Queue(pair) => pair.recv(shutdown).await,
            Duplex::Request(req) => req.recv(shutdown).await,
            Duplex::Reply(rep) => rep.recv(shutdown).await,
        }
    }
}

/// Collect exactly `count` replies from a set of queue pairs in arrival
/// order, one reply per pair.
///
/// This is the single-host counterpart of
/// [`PullEndpoint::collect`](crate::socket::PullEndpoint::collect).
pub async fn collect_in_arrival_order(
    pairs: &[QueuePair],
    count: usize,
    shutdown: &ShutdownFlag,
) -> Result<Vec<ControlMessage>> {
    let gather = async {
        let mut pending: FuturesUnordered<_> = pairs
            .iter()
            .map(|pair| async move {
                loop {
                    match pair.recv_deadline(Duration::from_secs(3600)).await? {
                        Some(message) => return Ok::<ControlMessage, Error>(message),
                        None => continue,
                    }
                }
            })
            .collect();
        let mut replies = Vec::with_capacity(count);
        while replies.len() < count {
            match pending.next().await {
                Some(message) => replies.push(message?),
                None => return Err(Error::QueueClosed),
            }
        }
        Ok(replies)
    };
    let watchdog = async {
        loop {
            smol::Timer::after(Duration::from_millis(200)).await;
            if shutdown.is_set() {
                return Err(Error::ShuttingDown);
            }
        }
    };
    future::or(gather, watchdog).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_core::{AckStatus, CompanionReply};

    #[test]
    fn duplex_queue_round_trip() {
        smol::block_on(async {
            let shutdown = ShutdownFlag::new();
            let (left, right) = QueuePair::channel();
            let mut a = Duplex::Queue(left);
            let mut b = Duplex::Queue(right);

            a.send(&ControlMessage::Ack(AckStatus::Ok)).await.unwrap();
            assert_eq!(
                b.recv(&shutdown).await.unwrap(),
                ControlMessage::Ack(AckStatus::Ok)
            );
        });
    }

    #[test]
    fn queue_fan_in_preserves_arrival_order() {
        smol::block_on(async {
            let shutdown = ShutdownFlag::new();
            let (far_a, near_a) = QueuePair::channel();
            let (far_b, near_b) = QueuePair::channel();

            // B replies before A while the collection is in flight.
            let senders = smol::spawn(async move {
                far_b
                    .send(&ControlMessage::Reply(CompanionReply::Empty))
                    .await
                    .unwrap();
                smol::Timer::after(Duration::from_millis(100)).await;
                far_a
                    .send(&ControlMessage::Reply(CompanionReply::Ok))
                    .await
                    .unwrap();
            });

            let replies = collect_in_arrival_order(&[near_a, near_b], 2, &shutdown)
                .await
                .unwrap();
            senders.await;
            assert_eq!(
                replies,
                vec![
                    ControlMessage::Reply(CompanionReply::Empty),
                    ControlMessage::Reply(CompanionReply::Ok)
                ]
            );
        });
    }

    #[test]
    fn shutdown_interrupts_fan_in() {
        smol::block_on(async {
            let shutdown = ShutdownFlag::new();
            let (_far, near) = QueuePair::channel();
            shutdown.trigger();
            let result = collect_in_arrival_order(&[near], 1, &shutdown).await;
            assert!(matches!(result, Err(Error::ShuttingDown)));
        });
    }
}
