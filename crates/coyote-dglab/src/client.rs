use std::sync::Arc;

use async_trait::async_trait;
use coyote_core::{Channel, DeviceEvent, PulseOperation, RetCode, StrengthOperation};
use coyote_session::transport::{DeviceClient, TransportError};
use tokio::sync::broadcast;

use crate::hub::{Hub, LocalEndpoint};
use crate::message::{MAX_PULSES_PER_MESSAGE, clear_payload, pulse_payload, strength_payload};

const QRCODE_PREFIX: &str = "https://www.dungeon-lab.com/app-download.php#DGLAB-SOCKET#";

/// In-process control endpoint registered on a [`DgLabServer`](crate::DgLabServer).
#[derive(Clone)]
pub struct LocalClient {
    endpoint: Arc<LocalEndpoint>,
    hub: Arc<Hub>,
}

impl LocalClient {
    pub(crate) fn new(endpoint: Arc<LocalEndpoint>, hub: Arc<Hub>) -> Self {
        Self { endpoint, hub }
    }

    pub fn id(&self) -> &str {
        &self.endpoint.id
    }

    fn send(&self, payload: String) -> Result<(), TransportError> {
        self.hub.send_to_app(&self.endpoint, payload)
    }
}

impl std::fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClient")
            .field("id", &self.endpoint.id)
            .field("target_id", &self.endpoint.target_id())
            .finish()
    }
}

#[async_trait]
impl DeviceClient for LocalClient {
    fn qrcode(&self, server_uri: &str) -> Option<String> {
        let uri = server_uri.trim_end_matches('/');
        if uri.is_empty() {
            return None;
        }
        Some(format!("{QRCODE_PREFIX}{uri}/{}", self.endpoint.id))
    }

    async fn bind(&self) -> Result<RetCode, TransportError> {
        let mut bound = self.endpoint.bound.subscribe();
        tokio::select! {
            result = bound.wait_for(Option::is_some) => {
                result.map_err(|_| TransportError::Closed)?;
                Ok(RetCode::Success)
            }
            _ = self.endpoint.closed.cancelled() => Err(TransportError::Closed),
        }
    }

    async fn ensure_bind(&self) -> Result<(), TransportError> {
        if self.is_bound() {
            return Ok(());
        }
        match self.bind().await? {
            RetCode::Success => Ok(()),
            other => Err(TransportError::Protocol(format!("bind failed: {other}"))),
        }
    }

    async fn set_strength(
        &self,
        channel: Channel,
        operation: StrengthOperation,
        value: u8,
    ) -> Result<(), TransportError> {
        self.send(strength_payload(channel, operation, value))
    }

    async fn add_pulses(
        &self,
        channel: Channel,
        pulses: &[PulseOperation],
    ) -> Result<(), TransportError> {
        if pulses.is_empty() {
            return Ok(());
        }
        if pulses.len() > MAX_PULSES_PER_MESSAGE {
            return Err(TransportError::Protocol(format!(
                "{} pulse operations exceed the per-message limit of {MAX_PULSES_PER_MESSAGE}",
                pulses.len()
            )));
        }
        self.send(pulse_payload(channel, pulses))
    }

    async fn clear_pulses(&self, channel: Channel) -> Result<(), TransportError> {
        self.send(clear_payload(channel))
    }

    fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.endpoint.events.subscribe()
    }

    fn is_bound(&self) -> bool {
        !self.endpoint.closed.is_cancelled() && self.endpoint.target_id().is_some()
    }

    fn client_id(&self) -> Option<String> {
        Some(self.endpoint.id.clone())
    }

    fn target_id(&self) -> Option<String> {
        self.endpoint.target_id()
    }
}
