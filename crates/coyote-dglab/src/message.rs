//! DG-LAB SOCKET v2 wire format.
//!
//! Every frame is a JSON text message `{type, clientId, targetId, message}`.
//! Control payloads travel inside `message` as compact strings:
//!
//! | direction   | payload                              |
//! |-------------|--------------------------------------|
//! | local → app | `strength-{1|2}+{0|1|2}+{value}`     |
//! | local → app | `pulse-{A|B}:["<16 hex>",...]`       |
//! | local → app | `clear-{1|2}`                        |
//! | app → local | `strength-{a}+{b}+{a_limit}+{b_limit}` |
//! | app → local | `feedback-{index}`                   |

use coyote_core::{Channel, DeviceEvent, PulseOperation, RetCode, StrengthData, StrengthOperation};
use serde::{Deserialize, Serialize};

/// Frames longer than this are rejected by the protocol.
pub const MAX_MESSAGE_LEN: usize = 1950;
/// Pulse operations accepted per `pulse-*` payload.
pub const MAX_PULSES_PER_MESSAGE: usize = 86;

pub const KIND_BIND: &str = "bind";
pub const KIND_MSG: &str = "msg";
pub const KIND_HEARTBEAT: &str = "heartbeat";
pub const KIND_BREAK: &str = "break";

/// Bind handshake marker sent by the app.
pub const BIND_MARKER: &str = "DGLAB";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "clientId", default)]
    pub client_id: String,
    #[serde(rename = "targetId", default)]
    pub target_id: String,
    #[serde(default)]
    pub message: String,
}

impl WireMessage {
    pub fn new(
        kind: &str,
        client_id: impl Into<String>,
        target_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            client_id: client_id.into(),
            target_id: target_id.into(),
            message: message.into(),
        }
    }

    /// A frame whose payload is a numeric return code.
    pub fn ret(
        kind: &str,
        client_id: impl Into<String>,
        target_id: impl Into<String>,
        code: RetCode,
    ) -> Self {
        Self::new(kind, client_id, target_id, code.code().to_string())
    }

    pub fn to_json(&self) -> String {
        // Four string fields: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub fn strength_payload(channel: Channel, operation: StrengthOperation, value: u8) -> String {
    format!(
        "strength-{}+{}+{}",
        channel.wire_number(),
        operation.wire_code(),
        value
    )
}

pub fn clear_payload(channel: Channel) -> String {
    format!("clear-{}", channel.wire_number())
}

/// `pulse-A:["0A0A0A0A00000000",...]`
pub fn pulse_payload(channel: Channel, pulses: &[PulseOperation]) -> String {
    let hexes: Vec<String> = pulses.iter().map(pulse_hex).collect();
    let list = serde_json::to_string(&hexes).unwrap_or_else(|_| "[]".to_string());
    format!("pulse-{}:{}", channel.as_str(), list)
}

/// Four frequency bytes followed by four strength bytes, upper-case hex.
pub fn pulse_hex(op: &PulseOperation) -> String {
    op.frequency
        .iter()
        .chain(op.strength.iter())
        .map(|b| format!("{b:02X}"))
        .collect()
}

/// Decode an app → local payload. Unknown payloads yield `None`.
pub fn parse_app_payload(payload: &str) -> Option<DeviceEvent> {
    if let Some(rest) = payload.strip_prefix("strength-") {
        let values: Vec<u8> = rest
            .split('+')
            .map(|v| v.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        let [a, b, a_limit, b_limit] = values.as_slice() else {
            return None;
        };
        return Some(DeviceEvent::Strength(StrengthData {
            a: *a,
            b: *b,
            a_limit: *a_limit,
            b_limit: *b_limit,
        }));
    }
    if let Some(rest) = payload.strip_prefix("feedback-") {
        return rest.trim().parse::<u8>().ok().map(DeviceEvent::Feedback);
    }
    None
}
