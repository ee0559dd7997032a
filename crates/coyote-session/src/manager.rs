//! The session manager: one device session per process, keyed by endpoint.
//!
//! All session-mutating work (create, reuse, teardown) runs under a single
//! async mutex. Protocol calls happen outside the lock on a cloned client
//! handle, so a waveform loop and a foreground call can interleave once a
//! session exists.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use coyote_core::types::CHANNEL_STRENGTH_RANGE;
use coyote_core::{
    Channel, DeviceEvent, PulseOperation, RawPulse, RetCode, SessionIdentity, StrengthOperation,
    validate_pulses,
};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::status::{ConnectOutcome, SessionStatus};
use crate::transport::{DeviceClient, DeviceServer, DeviceTransport};

/// Heartbeat used when the caller does not specify one.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// Background task handle
// ---------------------------------------------------------------------------

/// A spawned task paired with the token that stops it.
pub(crate) struct TaskHandle {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn spawn<F>(task: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        Self { handle, cancel }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the task to finish.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Active session
// ---------------------------------------------------------------------------

pub(crate) struct ActiveSession<T: DeviceTransport> {
    pub(crate) identity: SessionIdentity,
    server: T::Server,
    pub(crate) client: T::Client,
    monitor: TaskHandle,
    pub(crate) loops: HashMap<Channel, TaskHandle>,
    /// Log de-duplication only; live bind state comes from the client.
    pub(crate) last_bound: Arc<AtomicBool>,
}

impl<T: DeviceTransport> ActiveSession<T> {
    async fn stop_loops(&mut self) {
        for (channel, task) in std::mem::take(&mut self.loops) {
            task.stop().await;
            tracing::debug!(channel = %channel, "waveform loop stopped");
        }
    }

    /// Stop every task and the server. Failures are logged and returned.
    async fn teardown(mut self) -> Vec<String> {
        self.stop_loops().await;
        self.monitor.stop().await;
        match self.server.shutdown().await {
            Ok(()) => {
                tracing::info!(endpoint = %self.identity, "DG-LAB server stopped");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.identity, error = %e, "failed to stop DG-LAB server");
                vec![format!("server shutdown: {e}")]
            }
        }
    }

    fn status(&self) -> SessionStatus {
        let mut waveform_loops: Vec<Channel> = self
            .loops
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(channel, _)| *channel)
            .collect();
        waveform_loops.sort();
        SessionStatus {
            connected: true,
            bound: self.client.is_bound(),
            client_id: self.client.client_id(),
            target_id: self.client.target_id(),
            endpoint: Some(self.identity.uri()),
            waveform_loops,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub(crate) struct Shared<T: DeviceTransport> {
    transport: Option<T>,
    pub(crate) slot: Mutex<Option<ActiveSession<T>>>,
}

/// Owns the single device session. Cheap to clone; clones share the session.
pub struct SessionManager<T: DeviceTransport> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T: DeviceTransport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: DeviceTransport> SessionManager<T> {
    pub fn new(transport: T) -> Self {
        Self::with_transport(Some(transport))
    }

    /// A manager whose every operation fails with `DependencyUnavailable`.
    pub fn without_transport() -> Self {
        Self::with_transport(None)
    }

    pub fn with_transport(transport: Option<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                slot: Mutex::new(None),
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.shared.transport.is_some()
    }

    pub(crate) fn transport(&self) -> Result<&T, ControlError> {
        self.shared
            .transport
            .as_ref()
            .ok_or(ControlError::DependencyUnavailable)
    }

    /// Return the client of the session for `identity`, starting a new
    /// session (and closing any other one) when needed.
    pub async fn get_or_create_client(
        &self,
        identity: &SessionIdentity,
        heartbeat: Option<Duration>,
    ) -> Result<T::Client, ControlError> {
        self.session_client(identity, heartbeat)
            .await
            .map(|(client, _)| client)
    }

    async fn session_client(
        &self,
        identity: &SessionIdentity,
        heartbeat: Option<Duration>,
    ) -> Result<(T::Client, Arc<AtomicBool>), ControlError> {
        let transport = self.transport()?;
        let heartbeat = heartbeat
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_HEARTBEAT);

        let mut slot = self.shared.slot.lock().await;
        if let Some(active) = slot.as_ref() {
            if active.identity == *identity {
                return Ok((active.client.clone(), Arc::clone(&active.last_bound)));
            }
        }

        if let Some(previous) = slot.take() {
            tracing::info!(previous = %previous.identity, next = %identity, "endpoint changed, closing previous session");
            previous.teardown().await;
        }

        tracing::info!(endpoint = %identity, heartbeat_secs = heartbeat.as_secs_f64(), "starting DG-LAB server");
        let server = transport
            .start_server(identity.bind_host(), identity.port, heartbeat)
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %identity, error = %e, "failed to start DG-LAB server");
                ControlError::SessionStartFailure {
                    endpoint: identity.uri(),
                    detail: e.to_string(),
                }
            })?;
        let client = server.new_local_client();
        let last_bound = Arc::new(AtomicBool::new(false));

        let monitor = {
            let events = client.events();
            let last_bound = Arc::clone(&last_bound);
            let endpoint = identity.clone();
            TaskHandle::spawn(move |cancel| monitor_client(events, last_bound, endpoint, cancel))
        };

        *slot = Some(ActiveSession {
            identity: identity.clone(),
            server,
            client: client.clone(),
            monitor,
            loops: HashMap::new(),
            last_bound: Arc::clone(&last_bound),
        });
        Ok((client, last_bound))
    }

    /// Create or reuse the session, return its QR code URL and, when
    /// `bind_timeout` is given, wait that long for the app to bind.
    pub async fn get_qrcode_and_maybe_bind(
        &self,
        identity: &SessionIdentity,
        bind_timeout: Option<Duration>,
        heartbeat: Option<Duration>,
    ) -> Result<ConnectOutcome, ControlError> {
        let client = self.get_or_create_client(identity, heartbeat).await?;
        let qrcode_url = client.qrcode(&identity.uri());

        let (bind_success, bind_result) = match bind_timeout.filter(|d| !d.is_zero()) {
            None => (false, None),
            Some(limit) => match tokio::time::timeout(limit, client.bind()).await {
                Err(_) => (false, Some("TIMEOUT".to_string())),
                Ok(Err(e)) => (false, Some(format!("ERROR:{e}"))),
                Ok(Ok(code)) => (code == RetCode::Success, Some(code.name().to_string())),
            },
        };
        if let Some(result) = &bind_result {
            tracing::info!(endpoint = %identity, bind_result = %result, "bind attempt finished");
        }

        Ok(ConnectOutcome {
            qrcode_url,
            bind_success,
            bind_result,
            status: self.get_status().await,
        })
    }

    /// Create or reuse the session and wait until the app is bound.
    /// Without `bind_timeout` the wait is unbounded.
    pub async fn ensure_ready_for_control(
        &self,
        identity: &SessionIdentity,
        bind_timeout: Option<Duration>,
        heartbeat: Option<Duration>,
    ) -> Result<T::Client, ControlError> {
        let (client, last_bound) = self.session_client(identity, heartbeat).await?;

        let result = match bind_timeout.filter(|d| !d.is_zero()) {
            Some(limit) => tokio::time::timeout(limit, client.ensure_bind())
                .await
                .map_err(|_| ControlError::BindTimeout {
                    seconds: limit.as_secs_f64(),
                })?,
            None => client.ensure_bind().await,
        };
        result.map_err(|e| {
            tracing::warn!(endpoint = %identity, error = %e, "waiting for app binding failed");
            ControlError::BindFailure(e.to_string())
        })?;

        if client.is_bound() && !last_bound.swap(true, Ordering::SeqCst) {
            tracing::info!(
                endpoint = %identity,
                target_id = %client.target_id().unwrap_or_default(),
                "app bound"
            );
        }
        Ok(client)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_strength(
        &self,
        identity: &SessionIdentity,
        channel: &str,
        mode: &str,
        value: i64,
        max_value: i64,
        bind_timeout: Option<Duration>,
        heartbeat: Option<Duration>,
    ) -> Result<String, ControlError> {
        let client = self
            .ensure_ready_for_control(identity, bind_timeout, heartbeat)
            .await?;
        let channel = parse_channel(channel)?;
        let operation = StrengthOperation::parse_mode(mode)
            .ok_or_else(|| ControlError::InvalidMode(mode.trim().to_string()))?;
        let value = clamp_strength(operation, value, max_value);

        client
            .set_strength(channel, operation, value)
            .await
            .map_err(|e| {
                tracing::error!(channel = %channel, error = %e, "strength set failed");
                ControlError::ProtocolCallFailure(format!("strength set failed: {e}"))
            })?;
        tracing::info!(channel = %channel, mode = operation.name(), value, "strength set");
        Ok(format!(
            "channel {channel} strength updated: mode={}, value={value}",
            operation.name()
        ))
    }

    /// Validate a whole batch and submit it in one protocol call.
    ///
    /// Waits for binding without a bound; callers normally connect first.
    pub async fn add_pulses(
        &self,
        identity: &SessionIdentity,
        channel: &str,
        pulses: &[RawPulse],
    ) -> Result<String, ControlError> {
        let client = self.ensure_ready_for_control(identity, None, None).await?;
        let channel = parse_channel(channel)?;
        let operations = validate_pulses(pulses)?;

        submit_pulses(&client, channel, &operations).await?;
        Ok(format!(
            "appended {} pulse operations to channel {channel}",
            operations.len()
        ))
    }

    /// Stop the channel's waveform loop, then empty the device queue.
    pub async fn clear_pulses(
        &self,
        identity: &SessionIdentity,
        channel: &str,
    ) -> Result<String, ControlError> {
        let client = self.ensure_ready_for_control(identity, None, None).await?;
        let channel = parse_channel(channel)?;

        let task = {
            let mut slot = self.shared.slot.lock().await;
            slot.as_mut()
                .filter(|s| s.identity == *identity)
                .and_then(|s| s.loops.remove(&channel))
        };
        if let Some(task) = task {
            task.stop().await;
            tracing::info!(channel = %channel, "waveform loop stopped");
        }

        client.clear_pulses(channel).await.map_err(|e| {
            tracing::error!(channel = %channel, error = %e, "clearing waveform queue failed");
            ControlError::ProtocolCallFailure(format!("clearing waveform queue failed: {e}"))
        })?;
        tracing::info!(channel = %channel, "waveform queue cleared");
        Ok(format!("cleared waveform queue of channel {channel}"))
    }

    /// Close the active session. With `reset_channels`, both channels are
    /// first set to zero and cleared on a best-effort basis.
    ///
    /// Succeeds when no session exists. Cleanup failures are reported in the
    /// message but never fail the call.
    pub async fn disconnect(
        &self,
        identity: Option<&SessionIdentity>,
        reset_channels: bool,
    ) -> Result<String, ControlError> {
        self.transport()?;

        let mut slot = self.shared.slot.lock().await;
        let Some(mut session) = slot.take() else {
            return Ok("no active session".to_string());
        };
        if let Some(requested) = identity {
            if *requested != session.identity {
                tracing::debug!(requested = %requested, active = %session.identity, "disconnect closes the active session");
            }
        }

        session.stop_loops().await;

        let mut failures = Vec::new();
        if reset_channels {
            for channel in Channel::ALL {
                if let Err(e) = session
                    .client
                    .set_strength(channel, StrengthOperation::SetTo, 0)
                    .await
                {
                    failures.push(format!("channel {channel} strength reset: {e}"));
                }
                if let Err(e) = session.client.clear_pulses(channel).await {
                    failures.push(format!("channel {channel} clear: {e}"));
                }
            }
        }

        let endpoint = session.identity.uri();
        failures.extend(session.teardown().await);
        drop(slot);

        if failures.is_empty() {
            tracing::info!(endpoint = %endpoint, "disconnected");
            Ok(format!("disconnected from {endpoint}"))
        } else {
            tracing::warn!(endpoint = %endpoint, failures = ?failures, "disconnected with cleanup failures");
            Ok(format!(
                "disconnected from {endpoint} (cleanup failures: {})",
                failures.join("; ")
            ))
        }
    }

    pub async fn get_status(&self) -> SessionStatus {
        let slot = self.shared.slot.lock().await;
        slot.as_ref().map(ActiveSession::status).unwrap_or_default()
    }

    /// Identity of the active session, if any.
    pub async fn current_identity(&self) -> Option<SessionIdentity> {
        let slot = self.shared.slot.lock().await;
        slot.as_ref().map(|s| s.identity.clone())
    }

    /// Process-exit teardown. Channels are not reset.
    pub async fn shutdown(&self) {
        let session = self.shared.slot.lock().await.take();
        if let Some(session) = session {
            tracing::info!(endpoint = %session.identity, "shutting down session");
            session.teardown().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_channel(name: &str) -> Result<Channel, ControlError> {
    Channel::parse(name).ok_or_else(|| ControlError::InvalidChannel(name.trim().to_string()))
}

/// `max_value` is first clamped to the device range; `set` never exceeds it.
/// The result is always within the device range.
pub(crate) fn clamp_strength(operation: StrengthOperation, value: i64, max_value: i64) -> u8 {
    let (low, high) = (*CHANNEL_STRENGTH_RANGE.start(), *CHANNEL_STRENGTH_RANGE.end());
    let ceiling = max_value.clamp(low, high);
    let value = if operation == StrengthOperation::SetTo {
        value.min(ceiling)
    } else {
        value
    };
    u8::try_from(value.clamp(low, high)).unwrap_or(u8::MAX)
}

pub(crate) async fn submit_pulses<C: DeviceClient>(
    client: &C,
    channel: Channel,
    operations: &[PulseOperation],
) -> Result<(), ControlError> {
    client.add_pulses(channel, operations).await.map_err(|e| {
        tracing::error!(channel = %channel, error = %e, "waveform submission failed");
        ControlError::ProtocolCallFailure(format!("waveform submission failed: {e}"))
    })?;
    tracing::debug!(channel = %channel, count = operations.len(), "pulses submitted");
    Ok(())
}

async fn monitor_client(
    mut events: broadcast::Receiver<DeviceEvent>,
    last_bound: Arc<AtomicBool>,
    endpoint: SessionIdentity,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(DeviceEvent::Ret(RetCode::ClientDisconnected)) => {
                last_bound.store(false, Ordering::SeqCst);
                tracing::info!(endpoint = %endpoint, "app disconnected (CLIENT_DISCONNECTED)");
            }
            Ok(DeviceEvent::Ret(code)) => {
                tracing::debug!(endpoint = %endpoint, code = %code, "device result");
            }
            Ok(DeviceEvent::Strength(data)) => {
                tracing::debug!(
                    a = data.a,
                    b = data.b,
                    a_limit = data.a_limit,
                    b_limit = data.b_limit,
                    "device strength report"
                );
            }
            Ok(DeviceEvent::Feedback(index)) => {
                tracing::debug!(index, "app feedback button");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!(endpoint = %endpoint, "device event stream closed, monitor exiting");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use serde_json::json;

    fn identity(port: u16) -> SessionIdentity {
        SessionIdentity::parse(&format!("ws://127.0.0.1:{port}")).unwrap()
    }

    fn raw(freq: serde_json::Value, strength: serde_json::Value) -> RawPulse {
        serde_json::from_value(json!({ "frequency": freq, "strength": strength })).unwrap()
    }

    async fn set(
        manager: &SessionManager<MockTransport>,
        mode: &str,
        value: i64,
        max_value: i64,
    ) -> Result<String, ControlError> {
        manager
            .set_strength(&identity(5678), "A", mode, value, max_value, None, None)
            .await
    }

    #[tokio::test]
    async fn same_identity_reuses_session() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());

        let first = manager.get_or_create_client(&identity(5678), None).await.unwrap();
        let second = manager.get_or_create_client(&identity(5678), None).await.unwrap();

        assert!(first.same_as(&second));
        let log = transport.log();
        assert_eq!(log.server_starts.len(), 1);
        assert_eq!(log.server_starts[0], ("127.0.0.1".to_string(), 5678, DEFAULT_HEARTBEAT));
        assert_eq!(log.server_stops, 0);
    }

    #[tokio::test]
    async fn new_identity_tears_down_previous_session_once() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());

        let old = manager.get_or_create_client(&identity(5678), None).await.unwrap();
        manager
            .start_loop(&identity(5678), "A", vec![PulseOperation::new([80; 4], [50; 4])], None, None)
            .await
            .unwrap();
        assert_eq!(old.subscriber_count(), 1);

        let new = manager
            .get_or_create_client(&identity(5679), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!new.same_as(&old));
        // Monitor of the old session is gone.
        assert_eq!(old.subscriber_count(), 0);

        let submitted = transport.log().pulses.len();
        tokio::time::sleep(Duration::from_millis(250)).await;
        {
            let log = transport.log();
            assert_eq!(log.pulses.len(), submitted, "old loop must not resubmit");
            assert_eq!(log.server_stops, 1);
            assert_eq!(log.server_starts.len(), 2);
            assert_eq!(log.server_starts[1].1, 5679);
            assert_eq!(log.server_starts[1].2, Duration::from_secs(5));
        }

        let status = manager.get_status().await;
        assert_eq!(status.endpoint.as_deref(), Some("ws://127.0.0.1:5679"));
        assert!(status.waveform_loops.is_empty());
    }

    #[tokio::test]
    async fn start_failure_leaves_no_session() {
        let transport = MockTransport::bound();
        transport.state.fail_start.store(true, Ordering::SeqCst);
        let manager = SessionManager::new(transport.clone());

        let err = manager.get_or_create_client(&identity(5678), None).await.unwrap_err();
        assert!(matches!(err, ControlError::SessionStartFailure { .. }));
        assert!(!manager.get_status().await.connected);

        transport.state.fail_start.store(false, Ordering::SeqCst);
        manager.get_or_create_client(&identity(5678), None).await.unwrap();
        assert!(manager.get_status().await.connected);
    }

    #[tokio::test]
    async fn strength_is_clamped() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());

        set(&manager, "set", 250, 200).await.unwrap();
        set(&manager, "increase", -5, 200).await.unwrap();
        set(&manager, "decrease", -5, 200).await.unwrap();
        set(&manager, "set", 300, 999).await.unwrap();
        set(&manager, "SET_TO", 150, 100).await.unwrap();
        set(&manager, "increase", 250, 100).await.unwrap();

        let values: Vec<u8> = transport.log().strengths.iter().map(|s| s.2).collect();
        assert_eq!(values, vec![200, 0, 0, 200, 100, 200]);
        assert_eq!(transport.log().strengths[1].1, StrengthOperation::Increase);
    }

    #[tokio::test]
    async fn strength_message_names_operation() {
        let manager = SessionManager::new(MockTransport::bound());
        let message = set(&manager, "Set", 20, 200).await.unwrap();
        assert_eq!(message, "channel A strength updated: mode=SET_TO, value=20");
    }

    #[tokio::test]
    async fn invalid_channel_and_mode_submit_nothing() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());

        let err = manager
            .set_strength(&identity(5678), "C", "set", 10, 200, None, None)
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::InvalidChannel("C".into()));

        let err = set(&manager, "toggle", 10, 200).await.unwrap_err();
        assert_eq!(err, ControlError::InvalidMode("toggle".into()));
        assert!(transport.log().strengths.is_empty());
    }

    #[tokio::test]
    async fn protocol_failure_is_reported() {
        let transport = MockTransport::bound();
        transport.state.fail_strength.store(true, Ordering::SeqCst);
        let manager = SessionManager::new(transport);

        let err = set(&manager, "set", 10, 200).await.unwrap_err();
        let ControlError::ProtocolCallFailure(message) = err else {
            panic!("expected protocol failure, got {err:?}");
        };
        assert!(message.starts_with("strength set failed: "));
    }

    #[tokio::test]
    async fn bind_timeout_is_reported() {
        let transport = MockTransport::default();
        let manager = SessionManager::new(transport.clone());

        let err = manager
            .set_strength(
                &identity(5678),
                "A",
                "set",
                10,
                200,
                Some(Duration::from_millis(50)),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_bind_timeout());
        assert!(transport.log().strengths.is_empty());
    }

    #[tokio::test]
    async fn ensure_ready_tracks_first_bind_and_monitor_resets_it() {
        let transport = MockTransport::default();
        let manager = SessionManager::new(transport.clone());
        manager.get_or_create_client(&identity(5678), None).await.unwrap();
        let client = transport.last_client();

        let waiter = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_ready_for_control(&identity(5678), None, None).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        client.app_binds();
        waiter.await.unwrap().unwrap();

        let flag = {
            let slot = manager.shared.slot.lock().await;
            Arc::clone(&slot.as_ref().unwrap().last_bound)
        };
        assert!(flag.load(Ordering::SeqCst));

        client.app_leaves();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!flag.load(Ordering::SeqCst));
        assert!(!manager.get_status().await.bound);
    }

    #[tokio::test]
    async fn connect_without_timeout_skips_bind() {
        let transport = MockTransport::default();
        let manager = SessionManager::new(transport);

        let outcome = manager
            .get_qrcode_and_maybe_bind(&identity(5678), None, None)
            .await
            .unwrap();
        assert_eq!(
            outcome.qrcode_url.as_deref(),
            Some("qr://ws://127.0.0.1:5678/local-0")
        );
        assert!(!outcome.bind_success);
        assert!(outcome.bind_result.is_none());
        assert!(outcome.status.connected);
        assert!(!outcome.status.bound);
    }

    #[tokio::test]
    async fn connect_reports_timeout_and_success() {
        let transport = MockTransport::default();
        let manager = SessionManager::new(transport.clone());

        let outcome = manager
            .get_qrcode_and_maybe_bind(&identity(5678), Some(Duration::from_millis(30)), None)
            .await
            .unwrap();
        assert!(!outcome.bind_success);
        assert_eq!(outcome.bind_result.as_deref(), Some("TIMEOUT"));

        let client = transport.last_client();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.app_binds();
        });
        let outcome = manager
            .get_qrcode_and_maybe_bind(&identity(5678), Some(Duration::from_secs(5)), None)
            .await
            .unwrap();
        assert!(outcome.bind_success);
        assert_eq!(outcome.bind_result.as_deref(), Some("SUCCESS"));
        assert!(outcome.status.bound);
        assert_eq!(transport.log().server_starts.len(), 1);
    }

    #[tokio::test]
    async fn add_pulses_is_all_or_nothing() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());
        let batch = vec![
            raw(json!([10, 10, 10, 10]), json!([1, 1, 1, 1])),
            raw(json!([10, 10, 10]), json!([1, 1, 1, 1])),
            raw(json!([10, 10, 10, 10]), json!([1, 1, 1, 1])),
        ];

        let err = manager.add_pulses(&identity(5678), "A", &batch).await.unwrap_err();
        assert!(err.to_string().starts_with("pulse 2 "), "{err}");
        assert!(transport.log().pulses.is_empty());
    }

    #[tokio::test]
    async fn add_pulses_submits_validated_batch() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());
        let batch = vec![
            raw(json!([10, 20, 30, 40]), json!([0, 50, 100, 100])),
            raw(json!([300, 5, 80, 80]), json!([1, 2, 3, 400])),
        ];

        let message = manager.add_pulses(&identity(5678), "b", &batch).await.unwrap();
        assert_eq!(message, "appended 2 pulse operations to channel B");

        let log = transport.log();
        assert_eq!(log.pulses.len(), 1);
        let (channel, ops) = &log.pulses[0];
        assert_eq!(*channel, Channel::B);
        assert_eq!(ops[1], PulseOperation::new([240, 10, 80, 80], [1, 2, 3, 100]));
    }

    #[tokio::test]
    async fn clear_pulses_stops_loop_and_clears_queue() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());
        manager
            .start_loop(&identity(5678), "A", vec![PulseOperation::new([80; 4], [50; 4])], None, None)
            .await
            .unwrap();
        assert_eq!(manager.get_status().await.waveform_loops, vec![Channel::A]);

        manager.clear_pulses(&identity(5678), "a").await.unwrap();
        assert!(manager.get_status().await.waveform_loops.is_empty());
        assert_eq!(transport.log().clears, vec![Channel::A]);

        let submitted = transport.log().pulses.len();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(transport.log().pulses.len(), submitted);
    }

    #[tokio::test]
    async fn disconnect_without_session_is_a_noop() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());

        let message = manager.disconnect(None, true).await.unwrap();
        assert_eq!(message, "no active session");
        let log = transport.log();
        assert!(log.server_starts.is_empty());
        assert_eq!(log.server_stops, 0);
        assert!(log.strengths.is_empty());
    }

    #[tokio::test]
    async fn disconnect_resets_channels_and_tears_down() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());
        manager
            .start_loop(&identity(5678), "B", vec![PulseOperation::new([80; 4], [50; 4])], None, None)
            .await
            .unwrap();

        let message = manager.disconnect(Some(&identity(5678)), true).await.unwrap();
        assert_eq!(message, "disconnected from ws://127.0.0.1:5678");
        assert!(!manager.get_status().await.connected);

        let log = transport.log();
        assert_eq!(
            log.strengths,
            vec![
                (Channel::A, StrengthOperation::SetTo, 0),
                (Channel::B, StrengthOperation::SetTo, 0),
            ]
        );
        assert_eq!(log.clears, vec![Channel::A, Channel::B]);
        assert_eq!(log.server_stops, 1);
    }

    #[tokio::test]
    async fn disconnect_reports_cleanup_failures_but_succeeds() {
        let transport = MockTransport::bound();
        transport.state.fail_strength.store(true, Ordering::SeqCst);
        transport.state.fail_shutdown.store(true, Ordering::SeqCst);
        let manager = SessionManager::new(transport.clone());
        manager.get_or_create_client(&identity(5678), None).await.unwrap();

        let message = manager.disconnect(None, true).await.unwrap();
        assert!(message.contains("channel A strength reset"), "{message}");
        assert!(message.contains("channel B strength reset"), "{message}");
        assert!(message.contains("server shutdown"), "{message}");
        // Clears still ran after the strength failures.
        assert_eq!(transport.log().clears, vec![Channel::A, Channel::B]);
        assert!(!manager.get_status().await.connected);
    }

    #[tokio::test]
    async fn disconnect_reports_reset_failures_when_app_is_unbound() {
        let transport = MockTransport::default();
        let manager = SessionManager::new(transport.clone());
        manager.get_or_create_client(&identity(5678), None).await.unwrap();

        let message = manager.disconnect(None, true).await.unwrap();
        assert!(message.starts_with("disconnected from ws://127.0.0.1:5678 (cleanup failures:"), "{message}");
        assert!(message.contains("channel A strength reset: client is not bound to an app"), "{message}");
        assert!(message.contains("channel B clear: client is not bound to an app"), "{message}");
        let log = transport.log();
        assert!(log.strengths.is_empty());
        assert_eq!(log.server_stops, 1);
    }

    #[tokio::test]
    async fn disconnect_without_reset_only_tears_down() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());
        manager.get_or_create_client(&identity(5678), None).await.unwrap();

        manager.disconnect(None, false).await.unwrap();
        let log = transport.log();
        assert!(log.strengths.is_empty());
        assert!(log.clears.is_empty());
        assert_eq!(log.server_stops, 1);
    }

    #[tokio::test]
    async fn missing_transport_fails_every_operation() {
        let manager = SessionManager::<MockTransport>::without_transport();
        let id = identity(5678);

        assert!(!manager.is_available());
        assert_eq!(
            manager.get_or_create_client(&id, None).await.unwrap_err(),
            ControlError::DependencyUnavailable
        );
        assert_eq!(
            manager.get_qrcode_and_maybe_bind(&id, None, None).await.unwrap_err(),
            ControlError::DependencyUnavailable
        );
        assert_eq!(
            manager.set_strength(&id, "A", "set", 1, 200, None, None).await.unwrap_err(),
            ControlError::DependencyUnavailable
        );
        assert_eq!(
            manager.clear_pulses(&id, "A").await.unwrap_err(),
            ControlError::DependencyUnavailable
        );
        assert_eq!(
            manager.disconnect(None, true).await.unwrap_err(),
            ControlError::DependencyUnavailable
        );
    }

    #[tokio::test]
    async fn shutdown_stops_server_without_reset() {
        let transport = MockTransport::bound();
        let manager = SessionManager::new(transport.clone());
        manager.get_or_create_client(&identity(5678), None).await.unwrap();

        manager.shutdown().await;
        assert!(manager.current_identity().await.is_none());
        let log = transport.log();
        assert_eq!(log.server_stops, 1);
        assert!(log.strengths.is_empty());
    }

    #[test]
    fn clamp_strength_rules() {
        use StrengthOperation::*;
        assert_eq!(clamp_strength(SetTo, 250, 200), 200);
        assert_eq!(clamp_strength(SetTo, 120, 100), 100);
        assert_eq!(clamp_strength(SetTo, 50, -10), 0);
        assert_eq!(clamp_strength(Increase, -5, 200), 0);
        assert_eq!(clamp_strength(Decrease, 500, 50), 200);
        assert_eq!(clamp_strength(SetTo, 300, 999), 200);
    }
}
