//! In-memory transport for session manager tests.
//!
//! Every protocol call is recorded in a [`MockLog`] so tests can assert on
//! side effects (server starts and stops, submitted strengths and pulses).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use coyote_core::{Channel, DeviceEvent, PulseOperation, RetCode, StrengthOperation};
use tokio::sync::{broadcast, watch};

use crate::transport::{DeviceClient, DeviceServer, DeviceTransport, TransportError};

#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub server_starts: Vec<(String, u16, Duration)>,
    pub server_stops: usize,
    pub strengths: Vec<(Channel, StrengthOperation, u8)>,
    pub pulses: Vec<(Channel, Vec<PulseOperation>)>,
    pub clears: Vec<Channel>,
}

impl MockLog {
    pub fn pulses_on(&self, channel: Channel) -> Vec<&Vec<PulseOperation>> {
        self.pulses
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, ops)| ops)
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct MockState {
    log: Mutex<MockLog>,
    clients: Mutex<Vec<MockClient>>,
    next_id: AtomicUsize,
    /// Whether new clients start out bound.
    pub auto_bind: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_strength: AtomicBool,
    pub fail_pulses: AtomicBool,
    pub fail_shutdown: AtomicBool,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    pub state: Arc<MockState>,
}

impl MockTransport {
    /// Transport whose clients are bound as soon as they are created.
    pub fn bound() -> Self {
        let transport = Self::default();
        transport.state.auto_bind.store(true, Ordering::SeqCst);
        transport
    }

    pub fn log(&self) -> MutexGuard<'_, MockLog> {
        self.state.log.lock().unwrap()
    }

    pub fn last_client(&self) -> MockClient {
        self.state.clients.lock().unwrap().last().cloned().unwrap()
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.lock().unwrap().len()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    type Server = MockServer;
    type Client = MockClient;

    async fn start_server(
        &self,
        host: &str,
        port: u16,
        heartbeat: Duration,
    ) -> Result<MockServer, TransportError> {
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::StartFailed {
                addr: format!("{host}:{port}"),
                detail: "address in use".into(),
            });
        }
        self.log()
            .server_starts
            .push((host.to_string(), port, heartbeat));
        Ok(MockServer {
            state: Arc::clone(&self.state),
        })
    }
}

pub(crate) struct MockServer {
    state: Arc<MockState>,
}

#[async_trait]
impl DeviceServer for MockServer {
    type Client = MockClient;

    fn new_local_client(&self) -> MockClient {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let (bound, _) = watch::channel(self.state.auto_bind.load(Ordering::SeqCst));
        let (events, _) = broadcast::channel(16);
        let client = MockClient {
            state: Arc::clone(&self.state),
            inner: Arc::new(MockClientInner {
                id: format!("local-{id}"),
                bound,
                events,
            }),
        };
        self.state.clients.lock().unwrap().push(client.clone());
        client
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.state.log.lock().unwrap().server_stops += 1;
        if self.state.fail_shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("listener already gone".into()));
        }
        Ok(())
    }
}

struct MockClientInner {
    id: String,
    bound: watch::Sender<bool>,
    events: broadcast::Sender<DeviceEvent>,
}

#[derive(Clone)]
pub(crate) struct MockClient {
    state: Arc<MockState>,
    inner: Arc<MockClientInner>,
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("id", &self.inner.id)
            .field("bound", &*self.inner.bound.borrow())
            .finish()
    }
}

impl MockClient {
    /// Simulate the app scanning the QR code.
    pub fn app_binds(&self) {
        self.inner.bound.send_replace(true);
    }

    /// Simulate the app going away.
    pub fn app_leaves(&self) {
        self.inner.bound.send_replace(false);
        let _ = self
            .inner
            .events
            .send(DeviceEvent::Ret(RetCode::ClientDisconnected));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    pub fn same_as(&self, other: &MockClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn require_bound(&self) -> Result<(), TransportError> {
        if *self.inner.bound.borrow() {
            Ok(())
        } else {
            Err(TransportError::NotBound)
        }
    }
}

#[async_trait]
impl DeviceClient for MockClient {
    fn qrcode(&self, server_uri: &str) -> Option<String> {
        Some(format!("qr://{server_uri}/{}", self.inner.id))
    }

    async fn bind(&self) -> Result<RetCode, TransportError> {
        let mut rx = self.inner.bound.subscribe();
        rx.wait_for(|bound| *bound)
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(RetCode::Success)
    }

    async fn ensure_bind(&self) -> Result<(), TransportError> {
        self.bind().await.map(|_| ())
    }

    async fn set_strength(
        &self,
        channel: Channel,
        operation: StrengthOperation,
        value: u8,
    ) -> Result<(), TransportError> {
        self.require_bound()?;
        if self.state.fail_strength.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("app rejected strength".into()));
        }
        self.state
            .log
            .lock()
            .unwrap()
            .strengths
            .push((channel, operation, value));
        Ok(())
    }

    async fn add_pulses(
        &self,
        channel: Channel,
        pulses: &[PulseOperation],
    ) -> Result<(), TransportError> {
        self.require_bound()?;
        if self.state.fail_pulses.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("app rejected pulses".into()));
        }
        self.state
            .log
            .lock()
            .unwrap()
            .pulses
            .push((channel, pulses.to_vec()));
        Ok(())
    }

    async fn clear_pulses(&self, channel: Channel) -> Result<(), TransportError> {
        self.require_bound()?;
        self.state.log.lock().unwrap().clears.push(channel);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    fn is_bound(&self) -> bool {
        *self.inner.bound.borrow()
    }

    fn client_id(&self) -> Option<String> {
        Some(self.inner.id.clone())
    }

    fn target_id(&self) -> Option<String> {
        self.is_bound().then(|| "app-1".to_string())
    }
}
