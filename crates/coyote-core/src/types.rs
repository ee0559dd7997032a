//! Core domain types for the DG-LAB Coyote controller.
//!
//! These mirror the vocabulary of the DG-LAB SOCKET protocol (channels,
//! strength operations, pulse operations, return codes) without committing
//! to any wire encoding. The encoding lives in `coyote-dglab`.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Device-accepted waveform frequency range.
pub const FREQUENCY_RANGE: RangeInclusive<i64> = 10..=240;
/// Device-accepted waveform strength range (percent).
pub const PULSE_STRENGTH_RANGE: RangeInclusive<i64> = 0..=100;
/// Absolute channel intensity range accepted by the device.
pub const CHANNEL_STRENGTH_RANGE: RangeInclusive<i64> = 0..=200;

// ─── Channel ─────────────────────────────────────────────────────

/// One of the two independently controllable outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    /// Case-insensitive parse of `"A"` / `"B"` (surrounding whitespace ignored).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Channel::A),
            "B" => Some(Channel::B),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::A => "A",
            Channel::B => "B",
        }
    }

    /// Numeric selector used by `strength-*` and `clear-*` messages.
    pub fn wire_number(self) -> u8 {
        match self {
            Channel::A => 1,
            Channel::B => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Strength operation ──────────────────────────────────────────

/// How a strength value is applied to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrengthOperation {
    Decrease,
    Increase,
    SetTo,
}

impl StrengthOperation {
    /// Parse a caller-facing mode name: `set`/`set_to`, `increase`, `decrease`.
    pub fn parse_mode(mode: &str) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "set" | "set_to" => Some(StrengthOperation::SetTo),
            "increase" => Some(StrengthOperation::Increase),
            "decrease" => Some(StrengthOperation::Decrease),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StrengthOperation::Decrease => "DECREASE",
            StrengthOperation::Increase => "INCREASE",
            StrengthOperation::SetTo => "SET_TO",
        }
    }

    pub fn wire_code(self) -> u8 {
        match self {
            StrengthOperation::Decrease => 0,
            StrengthOperation::Increase => 1,
            StrengthOperation::SetTo => 2,
        }
    }
}

// ─── Pulse operation ─────────────────────────────────────────────

/// One 100ms quantum of waveform data: four frequency and four strength
/// samples. Values are always inside the device ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PulseOperation {
    pub frequency: [u8; 4],
    pub strength: [u8; 4],
}

impl PulseOperation {
    /// Build an operation, clamping every sample into the device ranges.
    pub fn new(frequency: [i64; 4], strength: [i64; 4]) -> Self {
        Self {
            frequency: frequency.map(|v| clamp_to(v, &FREQUENCY_RANGE)),
            strength: strength.map(|v| clamp_to(v, &PULSE_STRENGTH_RANGE)),
        }
    }
}

fn clamp_to(value: i64, range: &RangeInclusive<i64>) -> u8 {
    // Both ranges fit in u8.
    value.clamp(*range.start(), *range.end()) as u8
}

// ─── Return codes ────────────────────────────────────────────────

/// DG-LAB SOCKET protocol return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetCode {
    Success,
    ClientDisconnected,
    InvalidClientId,
    ServerDelay,
    IdAlreadyBound,
    TargetClientNotFound,
    IncompatibleRelationship,
    NonJsonContent,
    RecipientNotFound,
    MessageTooLong,
    ServerInternalError,
}

impl RetCode {
    pub fn code(self) -> u16 {
        match self {
            RetCode::Success => 200,
            RetCode::ClientDisconnected => 209,
            RetCode::InvalidClientId => 210,
            RetCode::ServerDelay => 211,
            RetCode::IdAlreadyBound => 400,
            RetCode::TargetClientNotFound => 401,
            RetCode::IncompatibleRelationship => 402,
            RetCode::NonJsonContent => 403,
            RetCode::RecipientNotFound => 404,
            RetCode::MessageTooLong => 405,
            RetCode::ServerInternalError => 500,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let ret = match code {
            200 => RetCode::Success,
            209 => RetCode::ClientDisconnected,
            210 => RetCode::InvalidClientId,
            211 => RetCode::ServerDelay,
            400 => RetCode::IdAlreadyBound,
            401 => RetCode::TargetClientNotFound,
            402 => RetCode::IncompatibleRelationship,
            403 => RetCode::NonJsonContent,
            404 => RetCode::RecipientNotFound,
            405 => RetCode::MessageTooLong,
            500 => RetCode::ServerInternalError,
            _ => return None,
        };
        Some(ret)
    }

    /// Upper-snake name, used verbatim in bind results.
    pub fn name(self) -> &'static str {
        match self {
            RetCode::Success => "SUCCESS",
            RetCode::ClientDisconnected => "CLIENT_DISCONNECTED",
            RetCode::InvalidClientId => "INVALID_CLIENT_ID",
            RetCode::ServerDelay => "SERVER_DELAY",
            RetCode::IdAlreadyBound => "ID_ALREADY_BOUND",
            RetCode::TargetClientNotFound => "TARGET_CLIENT_NOT_FOUND",
            RetCode::IncompatibleRelationship => "INCOMPATIBLE_RELATIONSHIP",
            RetCode::NonJsonContent => "NON_JSON_CONTENT",
            RetCode::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            RetCode::MessageTooLong => "MESSAGE_TOO_LONG",
            RetCode::ServerInternalError => "SERVER_INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Device events ───────────────────────────────────────────────

/// Strength report pushed by the app after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrengthData {
    pub a: u8,
    pub b: u8,
    pub a_limit: u8,
    pub b_limit: u8,
}

/// Events yielded by a client's data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Strength(StrengthData),
    /// App feedback button index (0-4 channel A, 5-9 channel B).
    Feedback(u8),
    Ret(RetCode),
}
