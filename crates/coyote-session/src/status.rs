//! Read-only snapshots returned to callers.

use coyote_core::Channel;
use serde::{Deserialize, Serialize};

/// Connection and bind state of the active session.
///
/// Bind fields are read live from the client handle, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub bound: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Channels with a running waveform loop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waveform_loops: Vec<Channel>,
}

/// Result of the connect handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOutcome {
    pub qrcode_url: Option<String>,
    pub bind_success: bool,
    /// `None` when no bind was attempted, `"TIMEOUT"`, `"ERROR:<detail>"`,
    /// or the protocol result code name.
    pub bind_result: Option<String>,
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_status_serializes_compactly() {
        let json = serde_json::to_value(SessionStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "connected": false, "bound": false }));
    }

    #[test]
    fn connected_status_round_trips() {
        let status = SessionStatus {
            connected: true,
            bound: true,
            client_id: Some("c".into()),
            target_id: Some("t".into()),
            endpoint: Some("ws://127.0.0.1:5678".into()),
            waveform_loops: vec![Channel::B],
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: SessionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
