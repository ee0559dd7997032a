//! coyote-dglab: a DG-LAB SOCKET v2 websocket server embedded in the
//! process, plus the local control client the session manager drives.
//!
//! The Coyote app connects to the server over websocket, scans the QR code
//! produced by [`LocalClient::qrcode`](coyote_session::transport::DeviceClient::qrcode)
//! and binds to the local client. From then on the local client relays
//! strength, pulse and clear commands to the app and receives the app's
//! strength and feedback reports.

pub mod client;
pub mod error;
mod hub;
pub mod message;
pub mod server;
pub mod transport;

pub use client::LocalClient;
pub use error::DgLabError;
pub use server::DgLabServer;
pub use transport::DgLabTransport;
