//! Device-protocol transport seam.
//!
//! The session manager only talks to these traits so that tests can inject a
//! mock transport with side-effect counters.

use std::time::Duration;

use async_trait::async_trait;
use coyote_core::{Channel, DeviceEvent, PulseOperation, RetCode, StrengthOperation};
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to start server on {addr}: {detail}")]
    StartFailed { addr: String, detail: String },

    #[error("client is not bound to an app")]
    NotBound,

    #[error("server is closed")]
    Closed,

    #[error("{0}")]
    Protocol(String),
}

/// Starts device servers.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    type Server: DeviceServer<Client = Self::Client>;
    type Client: DeviceClient;

    /// Bind a server on `host:port` sending heartbeats every `heartbeat`.
    async fn start_server(
        &self,
        host: &str,
        port: u16,
        heartbeat: Duration,
    ) -> Result<Self::Server, TransportError>;
}

/// A running server hosting exactly the clients created through it.
#[async_trait]
pub trait DeviceServer: Send + Sync + 'static {
    type Client: DeviceClient;

    /// Register the in-process control endpoint.
    fn new_local_client(&self) -> Self::Client;

    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// The local control endpoint. Cheap to clone; clones share state.
#[async_trait]
pub trait DeviceClient: Clone + Send + Sync + 'static {
    /// QR code URL for the app, keyed by the canonical server URI.
    fn qrcode(&self, server_uri: &str) -> Option<String>;

    /// Wait for the app to bind and report the protocol result.
    async fn bind(&self) -> Result<RetCode, TransportError>;

    /// Return immediately if bound, otherwise wait for a bind.
    async fn ensure_bind(&self) -> Result<(), TransportError>;

    async fn set_strength(
        &self,
        channel: Channel,
        operation: StrengthOperation,
        value: u8,
    ) -> Result<(), TransportError>;

    async fn add_pulses(
        &self,
        channel: Channel,
        pulses: &[PulseOperation],
    ) -> Result<(), TransportError>;

    async fn clear_pulses(&self, channel: Channel) -> Result<(), TransportError>;

    /// Subscribe to the client's data stream.
    fn events(&self) -> broadcast::Receiver<DeviceEvent>;

    fn is_bound(&self) -> bool;

    fn client_id(&self) -> Option<String>;

    fn target_id(&self) -> Option<String>;
}

// ─── Unavailable ─────────────────────────────────────────────────

/// Placeholder transport for builds without a device protocol
/// implementation. It has no values, so a manager using it can only be
/// constructed without a transport and reports `DependencyUnavailable`.
#[derive(Debug, Clone, Copy)]
pub enum Unavailable {}

#[async_trait]
impl DeviceTransport for Unavailable {
    type Server = Unavailable;
    type Client = Unavailable;

    async fn start_server(
        &self,
        _host: &str,
        _port: u16,
        _heartbeat: Duration,
    ) -> Result<Unavailable, TransportError> {
        match *self {}
    }
}

#[async_trait]
impl DeviceServer for Unavailable {
    type Client = Unavailable;

    fn new_local_client(&self) -> Unavailable {
        match *self {}
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        match *self {}
    }
}

#[async_trait]
impl DeviceClient for Unavailable {
    fn qrcode(&self, _server_uri: &str) -> Option<String> {
        match *self {}
    }

    async fn bind(&self) -> Result<RetCode, TransportError> {
        match *self {}
    }

    async fn ensure_bind(&self) -> Result<(), TransportError> {
        match *self {}
    }

    async fn set_strength(
        &self,
        _channel: Channel,
        _operation: StrengthOperation,
        _value: u8,
    ) -> Result<(), TransportError> {
        match *self {}
    }

    async fn add_pulses(
        &self,
        _channel: Channel,
        _pulses: &[PulseOperation],
    ) -> Result<(), TransportError> {
        match *self {}
    }

    async fn clear_pulses(&self, _channel: Channel) -> Result<(), TransportError> {
        match *self {}
    }

    fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        match *self {}
    }

    fn is_bound(&self) -> bool {
        match *self {}
    }

    fn client_id(&self) -> Option<String> {
        match *self {}
    }

    fn target_id(&self) -> Option<String> {
        match *self {}
    }
}
