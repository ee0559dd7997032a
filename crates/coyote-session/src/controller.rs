//! Host-facing control surface.
//!
//! Wraps a [`SessionManager`] with the configured endpoint, timeouts and
//! preset registry. Every operation returns an `ok` flag plus a message;
//! failures are logged and reported, never propagated.

use std::time::Duration;

use coyote_core::{PresetRegistry, RawPulse, SessionIdentity, resolve};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::manager::SessionManager;
use crate::status::{ConnectOutcome, SessionStatus};
use crate::transport::DeviceTransport;

/// Connection and safety settings used by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Full endpoint URI. Takes precedence over `scheme`/`host`/`port`.
    pub server_uri: Option<String>,
    pub scheme: Option<String>,
    pub host: String,
    pub port: String,
    /// Accepted for compatibility; the embedded server has no registration step.
    pub register_timeout: f64,
    pub bind_timeout: f64,
    pub heartbeat_interval: f64,
    /// Ceiling applied to `set` strength requests, itself clamped to 0..=200.
    pub max_intensity: i64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            server_uri: Some("ws://127.0.0.1:5678".to_string()),
            scheme: None,
            host: String::new(),
            port: String::new(),
            register_timeout: 10.0,
            bind_timeout: 60.0,
            heartbeat_interval: 20.0,
            max_intensity: 200,
        }
    }
}

impl ControlSettings {
    pub fn resolve_identity(&self, endpoint_override: Option<&str>) -> Result<SessionIdentity, ControlError> {
        let uri = endpoint_override
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .or(self.server_uri.as_deref());
        Ok(resolve(uri, self.scheme.as_deref(), &self.host, &self.port)?)
    }

    pub fn bind_timeout(&self) -> Option<Duration> {
        seconds(self.bind_timeout)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        seconds(self.heartbeat_interval)
    }
}

/// Positive, finite seconds as a duration; anything else means "none".
pub fn seconds(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    pub message: String,
}

impl ControlReply {
    fn from_result(operation: &str, result: Result<String, ControlError>) -> Self {
        match result {
            Ok(message) => Self { ok: true, message },
            Err(e) => {
                tracing::warn!(operation, error = %e, "control operation failed");
                Self {
                    ok: false,
                    message: e.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReply {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qrcode_url: Option<String>,
    pub bind_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

impl ConnectReply {
    fn failed(e: &ControlError) -> Self {
        Self {
            ok: false,
            message: e.to_string(),
            qrcode_url: None,
            bind_success: false,
            bind_result: None,
            status: None,
        }
    }

    fn connected(outcome: ConnectOutcome) -> Self {
        let qrcode = outcome.qrcode_url.as_deref().unwrap_or("unavailable");
        let mut message = format!("DG-LAB server ready, QR code: {qrcode}");
        if let Some(result) = &outcome.bind_result {
            message.push_str(&format!(", bind result: {result}"));
        }
        message.push_str(". Scan the QR code with the DG-LAB app to bind.");
        Self {
            ok: true,
            message,
            qrcode_url: outcome.qrcode_url,
            bind_success: outcome.bind_success,
            bind_result: outcome.bind_result,
            status: Some(outcome.status),
        }
    }
}

/// The operations a host (CLI, RPC server, chat tool) invokes.
pub struct Controller<T: DeviceTransport> {
    manager: SessionManager<T>,
    settings: ControlSettings,
    presets: PresetRegistry,
}

impl<T: DeviceTransport> Controller<T> {
    pub fn new(manager: SessionManager<T>, settings: ControlSettings, presets: PresetRegistry) -> Self {
        Self {
            manager,
            settings,
            presets,
        }
    }

    pub fn manager(&self) -> &SessionManager<T> {
        &self.manager
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    /// The active session's endpoint, or the configured one when idle.
    async fn target(&self) -> Result<SessionIdentity, ControlError> {
        if let Some(identity) = self.manager.current_identity().await {
            return Ok(identity);
        }
        self.settings.resolve_identity(None)
    }

    /// Start (or reuse) the session and return the QR code for the app.
    ///
    /// `register_timeout` is accepted but unused. Timeouts fall back to the
    /// configured values; a non-positive `bind_timeout` skips the bind wait.
    pub async fn connect(
        &self,
        endpoint_override: Option<&str>,
        _register_timeout: Option<f64>,
        bind_timeout: Option<f64>,
    ) -> ConnectReply {
        if let Err(e) = self.manager.transport() {
            return ConnectReply::failed(&e);
        }
        let identity = match self.settings.resolve_identity(endpoint_override) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "connect: endpoint not usable");
                return ConnectReply::failed(&e);
            }
        };
        let bind_timeout = bind_timeout.map_or(self.settings.bind_timeout(), seconds);

        match self
            .manager
            .get_qrcode_and_maybe_bind(&identity, bind_timeout, self.settings.heartbeat())
            .await
        {
            Ok(outcome) => ConnectReply::connected(outcome),
            Err(e) => {
                tracing::error!(endpoint = %identity, error = %e, "connect failed");
                ConnectReply::failed(&e)
            }
        }
    }

    pub async fn set_strength(&self, channel: &str, mode: &str, value: i64) -> ControlReply {
        let result = async {
            self.manager.transport()?;
            let identity = self.target().await?;
            self.manager
                .set_strength(
                    &identity,
                    channel,
                    mode,
                    value,
                    self.settings.max_intensity,
                    self.settings.bind_timeout(),
                    self.settings.heartbeat(),
                )
                .await
        }
        .await;
        ControlReply::from_result("set_strength", result)
    }

    pub async fn add_waveform(&self, channel: &str, pulses: &[RawPulse]) -> ControlReply {
        let result = async {
            self.manager.transport()?;
            let identity = self.target().await?;
            self.manager.add_pulses(&identity, channel, pulses).await
        }
        .await;
        ControlReply::from_result("add_waveform", result)
    }

    pub async fn clear_waveform(&self, channel: &str) -> ControlReply {
        let result = async {
            self.manager.transport()?;
            let identity = self.target().await?;
            self.manager.clear_pulses(&identity, channel).await
        }
        .await;
        ControlReply::from_result("clear_waveform", result)
    }

    /// Loop a named preset on `channel`.
    pub async fn play_preset(&self, channel: &str, preset: &str) -> ControlReply {
        let result: Result<String, ControlError> = async {
            self.manager.transport()?;
            let name = preset.trim().to_lowercase();
            let pulses = self
                .presets
                .get(&name)
                .ok_or_else(|| ControlError::UnknownPreset {
                    name: name.clone(),
                    available: self.presets.names().join(", "),
                })?
                .to_vec();
            let identity = self.target().await?;
            let message = self
                .manager
                .start_loop(
                    &identity,
                    channel,
                    pulses,
                    self.settings.bind_timeout(),
                    self.settings.heartbeat(),
                )
                .await?;
            Ok(format!("{message} (preset: {name}, looping)"))
        }
        .await;
        ControlReply::from_result("play_preset", result)
    }

    /// Reset both channels and close the session.
    pub async fn disconnect(&self) -> ControlReply {
        let result = async {
            let identity = self.manager.current_identity().await;
            self.manager.disconnect(identity.as_ref(), true).await
        }
        .await;
        ControlReply::from_result("disconnect", result)
    }

    pub async fn status(&self) -> SessionStatus {
        self.manager.get_status().await
    }

    /// Preset names in sorted order.
    pub fn list_presets(&self) -> Vec<String> {
        self.presets.names().into_iter().map(str::to_string).collect()
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
