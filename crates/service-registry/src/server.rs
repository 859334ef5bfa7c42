//! Registry proxy server
//!
//! Serves the registry over TCP. Each connection handles one request
//! at a time; registry access is serialized by the registry's own
//! lock, so updates stay linearizable. A connection that does not open
//! with the correct preshared key is answered and dropped.

use crate::error::{Error, Result};
use crate::registry::HealthRegistry;
use crate::wire::{RegistryRequest, RegistryResponse, RequestEnvelope, ResponseEnvelope};
use async_net::{TcpListener, TcpStream};
use control_core::PortRange;
use control_fabric::frame::{read_frame, write_frame};
use control_fabric::socket::bind_first_available;
use futures_lite::future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The registry server: listener, preshared key, hosted registry.
pub struct RegistryServer {
    registry: Arc<HealthRegistry>,
    listener: TcpListener,
    local_addr: SocketAddr,
    key: String,
}

impl RegistryServer {
    /// Bind inside the port range and host the given registry.
    pub async fn bind(
        ip: IpAddr,
        range: PortRange,
        key: impl Into<String>,
        registry: Arc<HealthRegistry>,
    ) -> Result<Self> {
        let (listener, local_addr) = bind_first_available(ip, range).await?;
        info!("registry server listening on {}", local_addr);
        Ok(Self {
            registry,
            listener,
            local_addr,
            key: key.into(),
        })
    }

    /// The bound address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The hosted registry.
    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Accept and serve connections until a `Stop` request marks the
    /// registry stopped.
    pub async fn run(&self) -> Result<()> {
        loop {
            if self.registry.is_stopped() {
                break;
            }
            let accepted = future::or(
                async { Some(self.listener.accept().await) },
                async {
                    // Wake periodically to notice the stop mark.
                    smol::Timer::after(Duration::from_millis(200)).await;
                    None
                },
            )
            .await;
            match accepted {
                None => continue,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok((stream, addr))) => {
                    debug!("registry connection from {}", addr);
                    let registry = self.registry.clone();
                    let key = self.key.clone();
                    smol::spawn(async move {
                        if let Err(e) = serve_connection(registry, key, stream).await {
                            debug!("registry connection from {} ended: {}", addr, e);
                        }
                    })
                    .detach();
                }
            }
        }
        info!("registry server stopped");
        Ok(())
    }
}

async fn serve_connection(
    registry: Arc<HealthRegistry>,
    key: String,
    mut stream: TcpStream,
) -> Result<()> {
    // Handshake: the first frame must carry the preshared key.
    let frame = read_frame(&mut stream).await?;
    let envelope: RequestEnvelope = serde_json::from_slice(&frame)?;
    let authenticated = matches!(
        &envelope.request,
        RegistryRequest::Hello { key: presented } if *presented == key
    );
    let response = if authenticated {
        RegistryResponse::Ok
    } else {
        warn!("registry connection rejected: bad preshared key");
        RegistryResponse::from_error(&Error::AuthFailed)
    };
    send_response(&mut stream, envelope.id, response).await?;
    if !authenticated {
        return Err(Error::AuthFailed);
    }

    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(control_fabric::Error::PeerClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let envelope: RequestEnvelope = serde_json::from_slice(&frame)?;
        let stop_requested = matches!(envelope.request, RegistryRequest::Stop);
        let response = dispatch(&registry, envelope.request).await;
        send_response(&mut stream, envelope.id, response).await?;
        if stop_requested {
            return Ok(());
        }
    }
}

async fn send_response(
    stream: &mut TcpStream,
    id: uuid::Uuid,
    response: RegistryResponse,
) -> Result<()> {
    let envelope = ResponseEnvelope { id, response };
    let payload = serde_json::to_vec(&envelope)?;
    write_frame(stream, &payload).await?;
    Ok(())
}

async fn dispatch(registry: &HealthRegistry, request: RegistryRequest) -> RegistryResponse {
    match request {
        RegistryRequest::Hello { .. } => {
            // A repeated handshake is harmless.
            RegistryResponse::Ok
        }
        RegistryRequest::Register { descriptor } => match registry.register(descriptor).await {
            Ok(()) => RegistryResponse::Ok,
            Err(e) => RegistryResponse::from_error(&e),
        },
        RegistryRequest::FindById { id } => {
            RegistryResponse::OptionalDescriptor(registry.find_by_id(id).await)
        }
        RegistryRequest::FindByName { name } => {
            RegistryResponse::OptionalDescriptor(registry.find_by_name(&name).await)
        }
        RegistryRequest::FindAll => RegistryResponse::Descriptors(registry.find_all().await),
        RegistryRequest::FindAllByCategory { category } => {
            RegistryResponse::Descriptors(registry.find_all_by_category(category).await)
        }
        RegistryRequest::FindAllByStatus { status } => {
            RegistryResponse::Descriptors(registry.find_all_by_status(status).await)
        }
        RegistryRequest::FindAllByState { state } => {
            RegistryResponse::Descriptors(registry.find_all_by_state(state).await)
        }
        RegistryRequest::UpdateStatus { id, status } => {
            match registry.update_status(id, status).await {
                Ok(descriptor) => RegistryResponse::Descriptor(descriptor),
                Err(e) => RegistryResponse::from_error(&e),
            }
        }
        RegistryRequest::UpdateLocalState { id, command } => {
            match registry.update_local_state(id, command).await {
                Ok(descriptor) => RegistryResponse::Descriptor(descriptor),
                Err(e) => RegistryResponse::from_error(&e),
            }
        }
        RegistryRequest::UpdateGlobalState => match registry.update_global_state().await {
            Ok(state) => RegistryResponse::State(state),
            Err(e) => RegistryResponse::from_error(&e),
        },
        RegistryRequest::CurrentGlobalState => {
            RegistryResponse::State(registry.current_global_state().await)
        }
        RegistryRequest::CurrentGlobalStatus => {
            RegistryResponse::Status(registry.current_global_status().await)
        }
        RegistryRequest::SystemUptime => {
            RegistryResponse::UptimeMillis(registry.system_uptime().await.as_millis() as u64)
        }
        RegistryRequest::LocalHistory => {
            RegistryResponse::LocalHistory(registry.local_state_transition_history().await)
        }
        RegistryRequest::GlobalHistory => {
            RegistryResponse::GlobalHistory(registry.global_state_transition_history().await)
        }
        RegistryRequest::Stop => {
            registry.stop();
            RegistryResponse::Ok
        }
    }
}
