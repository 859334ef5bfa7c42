//! Bounded in-memory queue endpoints for single-host deployments

use crate::error::{Error, Result};
use crate::frame::{decode, encode};
use crate::shutdown::ShutdownFlag;
use crate::DEFAULT_RECEIVE_TIMEOUT;
use control_core::{ControlMessage, Event};
use futures_lite::future;
use std::time::{Duration, Instant};

/// Capacity of each direction of a queue pair.
const QUEUE_CAPACITY: usize = 64;

/// One half of a bidirectional in-memory channel.
///
/// Messages travel as encoded frames so that both deployment modes
/// share the exact wire representation.
#[derive(Debug, Clone)]
pub struct QueuePair {
    tx: async_channel::Sender<Vec<u8>>,
    rx: async_channel::Receiver<Vec<u8>>,
    timeout: Duration,
}

impl QueuePair {
    /// Create two linked halves of a bidirectional channel.
    pub fn channel() -> (QueuePair, QueuePair) {
        let (a_tx, b_rx) = async_channel::bounded(QUEUE_CAPACITY);
        let (b_tx, a_rx) = async_channel::bounded(QUEUE_CAPACITY);
        (
            QueuePair {
                tx: a_tx,
                rx: a_rx,
                timeout: DEFAULT_RECEIVE_TIMEOUT,
            },
            QueuePair {
                tx: b_tx,
                rx: b_rx,
                timeout: DEFAULT_RECEIVE_TIMEOUT,
            },
        )
    }

    /// Override the receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a message to the peer half.
    pub async fn send(&self, message: &ControlMessage) -> Result<()> {
        let frame = encode(message)?;
        self.tx.send(frame).await.map_err(|_| Error::QueueClosed)
    }

    /// Receive one message, giving up after `timeout`.
    ///
    /// The deadline is absolute, so a wake-up without a message simply
    /// resumes waiting for the remainder.
    pub async fn recv_deadline(&self, timeout: Duration) -> Result<Option<ControlMessage>> {
        let deadline = Instant::now() + timeout;
        let received = future::or(
            async { Some(self.rx.recv().await) },
            async {
                smol::Timer::at(deadline).await;
                None
            },
        )
        .await;
        match received {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(decode(&frame)?)),
            Some(Err(_)) => Err(Error::QueueClosed),
        }
    }

    /// Blocking receive that re-inspects the shutdown flag on every
    /// timeout and yields a synthetic FATAL event once it is set.
    pub async fn recv(&self, shutdown: &ShutdownFlag) -> Result<ControlMessage> {
        loop {
            if shutdown.is_set() {
                return Ok(ControlMessage::Event(Event::Fatal));
            }
            if let Some(message) = self.recv_deadline(self.timeout).await? {
                return Ok(message);
            }
        }
    }
}
