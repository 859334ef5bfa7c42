//! Transparent registry proxy client

use crate::api::RegistryApi;
use crate::error::{Error, Result};
use crate::models::{LocalStateTransition, ServiceDescriptor};
use crate::wire::{
    RegistryRequest, RegistryResponse, RequestEnvelope, ResponseEnvelope, WireErrorCode,
};
use async_net::TcpStream;
use async_trait::async_trait;
use control_core::{LifecycleState, ServiceCategory, ServiceStatus, SteeringCommand};
use control_fabric::frame::{read_frame, write_frame};
use futures::lock::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Client proxy to a remote registry.
///
/// One request is in flight at a time; the registry serializes
/// everything anyway. Cloning is not offered: each component owns its
/// proxy connection.
pub struct RegistryClient {
    stream: Mutex<TcpStream>,
}

impl RegistryClient {
    /// Connect and authenticate with the preshared key.
    pub async fn connect(addr: SocketAddr, key: &str) -> Result<Self> {
        let stream = connect_with_backoff(addr).await?;
        let client = Self {
            stream: Mutex::new(stream),
        };
        match client
            .request(RegistryRequest::Hello {
                key: key.to_string(),
            })
            .await?
        {
            RegistryResponse::Ok => {
                info!("connected to registry at {}", addr);
                Ok(client)
            }
            RegistryResponse::Error { code: WireErrorCode::AuthFailed, .. } => {
                Err(Error::AuthFailed)
            }
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn request(&self, request: RegistryRequest) -> Result<RegistryResponse> {
        let mut stream = self.stream.lock().await;
        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            request,
        };
        let payload = serde_json::to_vec(&envelope)?;
        write_frame(&mut *stream, &payload).await?;
        let frame = read_frame(&mut *stream).await?;
        let response: ResponseEnvelope = serde_json::from_slice(&frame)?;
        if response.id != envelope.id {
            return Err(Error::UnexpectedResponse(
                "response correlation id mismatch".to_string(),
            ));
        }
        Ok(response.response)
    }
}

async fn connect_with_backoff(addr: SocketAddr) -> Result<TcpStream> {
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
    Err(last_error
        .map(Error::Io)
        .unwrap_or_else(|| Error::UnexpectedResponse("no connection attempt made".to_string())))
}

fn into_error(code: WireErrorCode, message: String) -> Error {
    match code {
        WireErrorCode::AuthFailed => Error::AuthFailed,
        WireErrorCode::NotFound => Error::NotFound(message),
        WireErrorCode::IllegalTransition => Error::IllegalTransition(message),
        WireErrorCode::Stateless => Error::Stateless(message),
        _ => Error::UnexpectedResponse(message),
    }
}

fn expect_ok(response: RegistryResponse) -> Result<()> {
    match response {
        RegistryResponse::Ok => Ok(()),
        RegistryResponse::Error { code, message } => Err(into_error(code, message)),
        other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
    }
}

fn expect_descriptor(response: RegistryResponse) -> Result<ServiceDescriptor> {
    match response {
        RegistryResponse::Descriptor(descriptor) => Ok(descriptor),
        RegistryResponse::Error { code, message } => Err(into_error(code, message)),
        other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
    }
}

fn expect_descriptors(response: RegistryResponse) -> Result<Vec<ServiceDescriptor>> {
    match response {
        RegistryResponse::Descriptors(descriptors) => Ok(descriptors),
        RegistryResponse::Error { code, message } => Err(into_error(code, message)),
        other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
    }
}

fn expect_state(response: RegistryResponse) -> Result<LifecycleState> {
    match response {
        RegistryResponse::State(state) => Ok(state),
        RegistryResponse::Error { code, message } => Err(into_error(code, message)),
        other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        let id = descriptor.id;
        let response = self.request(RegistryRequest::Register { descriptor }).await?;
        match response {
            RegistryResponse::Ok => Ok(()),
            RegistryResponse::Error { code: WireErrorCode::DuplicateId, .. } => {
                Err(Error::DuplicateId(id))
            }
            RegistryResponse::Error { code, message } => Err(into_error(code, message)),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn find_by_id(&self, id: u32) -> Result<Option<ServiceDescriptor>> {
        match self.request(RegistryRequest::FindById { id }).await? {
            RegistryResponse::OptionalDescriptor(descriptor) => Ok(descriptor),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ServiceDescriptor>> {
        let request = RegistryRequest::FindByName {
            name: name.to_string(),
        };
        match self.request(request).await? {
            RegistryResponse::OptionalDescriptor(descriptor) => Ok(descriptor),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn find_all(&self) -> Result<Vec<ServiceDescriptor>> {
        expect_descriptors(self.request(RegistryRequest::FindAll).await?)
    }

    async fn find_all_by_category(
        &self,
        category: ServiceCategory,
    ) -> Result<Vec<ServiceDescriptor>> {
        expect_descriptors(
            self.request(RegistryRequest::FindAllByCategory { category })
                .await?,
        )
    }

    async fn find_all_by_status(&self, status: ServiceStatus) -> Result<Vec<ServiceDescriptor>> {
        expect_descriptors(
            self.request(RegistryRequest::FindAllByStatus { status })
                .await?,
        )
    }

    async fn find_all_by_state(&self, state: LifecycleState) -> Result<Vec<ServiceDescriptor>> {
        expect_descriptors(
            self.request(RegistryRequest::FindAllByState { state })
                .await?,
        )
    }

    async fn update_status(&self, id: u32, status: ServiceStatus) -> Result<ServiceDescriptor> {
        expect_descriptor(
            self.request(RegistryRequest::UpdateStatus { id, status })
                .await?,
        )
    }

    async fn update_local_state(
        &self,
        id: u32,
        command: SteeringCommand,
    ) -> Result<ServiceDescriptor> {
        expect_descriptor(
            self.request(RegistryRequest::UpdateLocalState { id, command })
                .await?,
        )
    }

    async fn update_global_state(&self) -> Result<LifecycleState> {
        expect_state(self.request(RegistryRequest::UpdateGlobalState).await?)
    }

    async fn current_global_state(&self) -> Result<LifecycleState> {
        expect_state(self.request(RegistryRequest::CurrentGlobalState).await?)
    }

    async fn current_global_status(&self) -> Result<ServiceStatus> {
        match self.request(RegistryRequest::CurrentGlobalStatus).await? {
            RegistryResponse::Status(status) => Ok(status),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn system_uptime(&self) -> Result<Duration> {
        match self.request(RegistryRequest::SystemUptime).await? {
            RegistryResponse::UptimeMillis(millis) => Ok(Duration::from_millis(millis)),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn local_state_transition_history(&self) -> Result<Vec<LocalStateTransition>> {
        match self.request(RegistryRequest::LocalHistory).await? {
            RegistryResponse::LocalHistory(history) => Ok(history),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn global_state_transition_history(&self) -> Result<Vec<LifecycleState>> {
        match self.request(RegistryRequest::GlobalHistory).await? {
            RegistryResponse::GlobalHistory(history) => Ok(history),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn stop(&self) -> Result<()> {
        expect_ok(self.request(RegistryRequest::Stop).await?)
    }
}
