//! coyote-session: the stateful half of the Coyote controller.
//!
//! A single [`SessionManager`] owns at most one embedded DG-LAB server and
//! its local client, a bind-state monitor and up to one waveform loop per
//! channel. [`Controller`] layers configuration and presets on top and is
//! what hosts call.

pub mod controller;
pub mod error;
pub mod manager;
#[cfg(test)]
mod mock;
pub mod status;
pub mod transport;
pub mod waveform;

pub use controller::{ConnectReply, ControlReply, ControlSettings, Controller};
pub use error::ControlError;
pub use manager::{DEFAULT_HEARTBEAT, SessionManager};
pub use status::{ConnectOutcome, SessionStatus};
pub use transport::{DeviceClient, DeviceServer, DeviceTransport, TransportError, Unavailable};
pub use waveform::loop_period;
