//! Error taxonomy of the control engine.
//!
//! Validation variants are produced before any protocol call is made, so a
//! failed validation never leaves partial state behind.

use coyote_core::{EndpointError, PulseDataError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to start DG-LAB server for {endpoint}: {detail}")]
    SessionStartFailure { endpoint: String, detail: String },

    #[error("app did not bind within {seconds} seconds, scan the QR code with the DG-LAB app")]
    BindTimeout { seconds: f64 },

    #[error("waiting for app binding failed: {0}")]
    BindFailure(String),

    #[error("invalid channel: {0}, only A or B is supported")]
    InvalidChannel(String),

    #[error("invalid mode: {0}, only set/increase/decrease is supported")]
    InvalidMode(String),

    #[error("{0}")]
    InvalidPulseData(String),

    #[error("unknown preset: {name}, available: {available}")]
    UnknownPreset { name: String, available: String },

    #[error("{0}")]
    ProtocolCallFailure(String),

    #[error("DG-LAB transport is not available in this build")]
    DependencyUnavailable,

    #[error("session for {0} was closed")]
    SessionClosed(String),
}

impl ControlError {
    /// Bind timeouts mean "rescan the QR code" rather than a generic error.
    pub fn is_bind_timeout(&self) -> bool {
        matches!(self, ControlError::BindTimeout { .. })
    }
}

impl From<EndpointError> for ControlError {
    fn from(e: EndpointError) -> Self {
        ControlError::InvalidEndpoint(e.to_string())
    }
}

impl From<PulseDataError> for ControlError {
    fn from(e: PulseDataError) -> Self {
        ControlError::InvalidPulseData(e.to_string())
    }
}
