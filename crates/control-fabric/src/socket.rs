//! TCP socket endpoints for distributed deployments
//!
//! The topology mirrors the steering fabric: request/reply between
//! steering front-end, orchestrator and C&C, publish/subscribe for the
//! command broadcast, push/pull for the reply fan-in. Each binding
//! endpoint picks the first free port from a configured range with a
//! bounded number of tries; failure to bind is fatal to the component.

use crate::error::{Error, Result};
use crate::frame::{decode, read_frame, read_frame_timeout, write_frame, write_message};
use crate::shutdown::ShutdownFlag;
use crate::DEFAULT_RECEIVE_TIMEOUT;
use async_net::{TcpListener, TcpStream};
use control_core::{ControlMessage, Event, PortRange};
use futures::stream::{FuturesUnordered, StreamExt};
use futures_lite::future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bind a listener to the first free port in the range.
pub async fn bind_first_available(ip: IpAddr, range: PortRange) -> Result<(TcpListener, SocketAddr)> {
    for port in range.candidates() {
        match TcpListener::bind((ip, port)).await {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                info!("bound to {}", addr);
                return Ok((listener, addr));
            }
            Err(e) => {
                debug!("port {} unavailable: {}", port, e);
            }
        }
    }
    Err(Error::BindExhausted {
        min: range.min,
        max: range.max,
    })
}

/// Dial a peer whose address was discovered through the registry.
///
/// The peer may still be binding, so a bounded retry loop smooths over
/// the startup race.
async fn connect_with_retries(addr: SocketAddr) -> Result<TcpStream> {
    const ATTEMPTS: u32 = 50;
    const BACKOFF: Duration = Duration::from_millis(100);

    let mut last_error = None;
    for _ in 0..ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_error = Some(e);
                smol::Timer::after(BACKOFF).await;
            }
        }
    }
    Err(Error::ConnectFailed {
        addr: addr.to_string(),
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string()),
    })
}

/// Accept one connection with a timeout. `None` means the timer won.
async fn accept_with_timeout(
    listener: &TcpListener,
    timeout: Duration,
) -> Result<Option<(TcpStream, SocketAddr)>> {
    let accepted = future::or(
        async { Some(listener.accept().await) },
        async {
            smol::Timer::after(timeout).await;
            None
        },
    )
    .await;
    match accepted {
        None => Ok(None),
        Some(Ok(pair)) => Ok(Some(pair)),
        Some(Err(e)) => Err(e.into()),
    }
}

/// Client half of a request/reply edge.
pub struct ReqEndpoint {
    stream: TcpStream,
    timeout: Duration,
}

impl ReqEndpoint {
    /// Connect to the reply side.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = connect_with_retries(addr).await?;
        info!("request endpoint connected to {}", addr);
        Ok(Self {
            stream,
            timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    /// Send a message to the reply side.
    pub async fn send(&mut self, message: &ControlMessage) -> Result<()> {
        write_message(&mut self.stream, message).await
    }

    /// Receive the correlated reply.
    pub async fn recv(&mut self, shutdown: &ShutdownFlag) -> Result<ControlMessage> {
        loop {
            if shutdown.is_set() {
                return Ok(ControlMessage::Event(Event::Fatal));
            }
            if let Some(payload) = read_frame_timeout(&mut self.stream, self.timeout).await? {
                return decode(&payload);
            }
        }
    }

    /// Send a request and block for its reply.
    pub async fn request(
        &mut self,
        message: &ControlMessage,
        shutdown: &ShutdownFlag,
    ) -> Result<ControlMessage> {
        self.send(message).await?;
        self.recv(shutdown).await
    }
}

/// Server half of a request/reply edge. Serves exactly one long-lived
/// peer, accepted lazily on the first receive.
pub struct RepEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    peer: Option<TcpStream>,
    timeout: Duration,
}

impl RepEndpoint {
    /// Bind inside the port range.
    pub async fn bind(ip: IpAddr, range: PortRange) -> Result<Self> {
        let (listener, local_addr) = bind_first_available(ip, range).await?;
        Ok(Self {
            listener,
            local_addr,
            peer: None,
            timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    /// The bound address, registered for peer discovery.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive the next request, accepting the peer first if needed.
    pub async fn recv(&mut self, shutdown: &ShutdownFlag) -> Result<ControlMessage> {
        loop {
            if shutdown.is_set() {
                return Ok(ControlMessage::Event(Event::Fatal));
            }
            let Some(peer) = self.peer.as_mut() else {
                if let Some((stream, addr)) = accept_with_timeout(&self.listener, self.timeout).await? {
                    debug!("reply endpoint accepted peer {}", addr);
                    self.peer = Some(stream);
                }
                continue;
            };
            match read_frame_timeout(peer, self.timeout).await {
                Ok(None) => continue,
                Ok(Some(payload)) => return decode(&payload),
                Err(Error::PeerClosed) => {
                    warn!("request peer disconnected");
                    self.peer = None;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a reply to the connected peer.
    pub async fn send(&mut self, message: &ControlMessage) -> Result<()> {
        let peer = self.peer.as_mut().ok_or(Error::PeerClosed)?;
        write_message(peer, message).await
    }
}

/// Publishing half of the broadcast edge.
pub struct PubEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    subscribers: Vec<TcpStream>,
    timeout: Duration,
}

impl PubEndpoint {
    /// Bind inside the port range.
    pub async fn bind(ip: IpAddr, range: PortRange) -> Result<Self> {
        let (listener, local_addr) = bind_first_available(ip, range).await?;
        Ok(Self {
            listener,
            local_addr,
            subscribers: Vec::new(),
            timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    /// The bound address, registered for peer discovery.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Broadcast one message under a topic to every expected
    /// subscriber.
    ///
    /// The broadcast is atomic per command: subscribers are accepted
    /// until the expected count is reached (bounded by the receive
    /// timeout), then the topic frame and payload are written to all of
    /// them. Any failure fails the whole broadcast.
    pub async fn broadcast(
        &mut self,
        topic: &str,
        message: &ControlMessage,
        expected: usize,
        shutdown: &ShutdownFlag,
    ) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        while self.subscribers.len() < expected {
            if shutdown.is_set() {
                return Err(Error::ShuttingDown);
            }
            let accepted = future::or(
                async { Some(self.listener.accept().await) },
                async {
                    smol::Timer::at(deadline).await;
                    None
                },
            )
            .await;
            match accepted {
                Some(Ok((stream, addr))) => {
                    debug!("subscriber connected from {}", addr);
                    self.subscribers.push(stream);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(Error::BroadcastIncomplete {
                        expected,
                        connected: self.subscribers.len(),
                    });
                }
            }
        }

        let payload = crate::frame::encode(message)?;
        for subscriber in &mut self.subscribers {
            write_frame(subscriber, topic.as_bytes()).await?;
            write_frame(subscriber, &payload).await?;
        }
        Ok(())
    }
}

/// Subscribing half of the broadcast edge.
pub struct SubEndpoint {
    stream: TcpStream,
    topic: String,
    timeout: Duration,
}

impl SubEndpoint {
    /// Connect to a publisher and subscribe to a topic.
    pub async fn connect(addr: SocketAddr, topic: impl Into<String>) -> Result<Self> {
        let stream = connect_with_retries(addr).await?;
        let topic = topic.into();
        info!("subscribed to {:?} at {}", topic, addr);
        Ok(Self {
            stream,
            topic,
            timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    /// Receive the next broadcast message.
    pub async fn recv(&mut self, shutdown: &ShutdownFlag) -> Result<ControlMessage> {
        loop {
            if shutdown.is_set() {
                return Ok(ControlMessage::Event(Event::Fatal));
            }
            let Some(topic_frame) = read_frame_timeout(&mut self.stream, self.timeout).await?
            else {
                continue;
            };
            let topic = String::from_utf8_lossy(&topic_frame).into_owned();
            if topic != self.topic {
                return Err(Error::TopicMismatch {
                    expected: self.topic.clone(),
                    got: topic,
                });
            }
            let payload = read_frame(&mut self.stream).await?;
            return decode(&payload);
        }
    }
}

/// Pushing half of the reply fan-in: binds and serves one puller.
pub struct PushEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    peer: Option<TcpStream>,
    timeout: Duration,
}

impl PushEndpoint {
    /// Bind inside the port range.
    pub async fn bind(ip: IpAddr, range: PortRange) -> Result<Self> {
        let (listener, local_addr) = bind_first_available(ip, range).await?;
        Ok(Self {
            listener,
            local_addr,
            peer: None,
            timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    /// The bound address, registered for peer discovery.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Push one message to the puller, accepting it first if needed.
    pub async fn send(&mut self, message: &ControlMessage, shutdown: &ShutdownFlag) -> Result<()> {
        while self.peer.is_none() {
            if shutdown.is_set() {
                return Err(Error::ShuttingDown);
            }
            if let Some((stream, addr)) = accept_with_timeout(&self.listener, self.timeout).await? {
                debug!("puller connected from {}", addr);
                self.peer = Some(stream);
            }
        }
        let peer = self.peer.as_mut().ok_or(Error::PeerClosed)?;
        write_message(peer, message).await
    }
}

/// Pulling half of the reply fan-in: connects to every pusher and
/// collects replies in arrival order.
pub struct PullEndpoint {
    connections: Vec<TcpStream>,
}

impl PullEndpoint {
    /// Connect to every pusher address.
    pub async fn connect(addrs: &[SocketAddr]) -> Result<Self> {
        let mut connections = Vec::with_capacity(addrs.len());
        for addr in addrs {
            connections.push(connect_with_retries(*addr).await?);
        }
        Ok(Self { connections })
    }

    /// Number of connected pushers.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no pusher is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Collect exactly `count` replies, one per pusher, in arrival
    /// order rather than connection order.
    pub async fn collect(
        &mut self,
        count: usize,
        shutdown: &ShutdownFlag,
    ) -> Result<Vec<ControlMessage>> {
        let gather = async {
            let mut pending: FuturesUnordered<_> = self
                .connections
                .iter_mut()
                .map(|conn| async move { read_frame(conn).await })
                .collect();
            let mut replies = Vec::with_capacity(count);
            while replies.len() < count {
                match pending.next().await {
                    Some(frame) => replies.push(decode(&frame?)?),
                    None => return Err(Error::PeerClosed),
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
}
