//! Caller-supplied pulse data and its all-or-nothing validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::PulseOperation;

/// Unvalidated pulse as received from a host (typically JSON).
///
/// Accepts `freq` / `amplitude` as aliases of `frequency` / `strength`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPulse {
    #[serde(alias = "freq")]
    pub frequency: Vec<Value>,
    #[serde(alias = "amplitude")]
    pub strength: Vec<Value>,
}

impl RawPulse {
    pub fn new(frequency: Vec<Value>, strength: Vec<Value>) -> Self {
        Self { frequency, strength }
    }
}

impl From<&PulseOperation> for RawPulse {
    fn from(op: &PulseOperation) -> Self {
        Self {
            frequency: op.frequency.iter().map(|&v| Value::from(v)).collect(),
            strength: op.strength.iter().map(|&v| Value::from(v)).collect(),
        }
    }
}

/// Validation failure; `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PulseDataError {
    #[error(
        "pulse {index} is invalid: expected 4 frequency and 4 strength values, got {frequencies} and {strengths}"
    )]
    WrongArity {
        index: usize,
        frequencies: usize,
        strengths: usize,
    },

    #[error("pulse {index} contains a value that cannot be converted to an integer: {value}")]
    NotInteger { index: usize, value: String },
}

impl PulseDataError {
    pub fn index(&self) -> usize {
        match self {
            PulseDataError::WrongArity { index, .. } | PulseDataError::NotInteger { index, .. } => {
                *index
            }
        }
    }
}

/// Validate a whole batch. Either every pulse converts or none does.
pub fn validate_pulses(pulses: &[RawPulse]) -> Result<Vec<PulseOperation>, PulseDataError> {
    pulses
        .iter()
        .enumerate()
        .map(|(i, pulse)| validate_one(i + 1, pulse))
        .collect()
}

fn validate_one(index: usize, pulse: &RawPulse) -> Result<PulseOperation, PulseDataError> {
    if pulse.frequency.len() != 4 || pulse.strength.len() != 4 {
        return Err(PulseDataError::WrongArity {
            index,
            frequencies: pulse.frequency.len(),
            strengths: pulse.strength.len(),
        });
    }
    let frequency = integers(index, &pulse.frequency)?;
    let strength = integers(index, &pulse.strength)?;
    Ok(PulseOperation::new(frequency, strength))
}

fn integers(index: usize, values: &[Value]) -> Result<[i64; 4], PulseDataError> {
    let mut out = [0i64; 4];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = as_integer(value).ok_or_else(|| PulseDataError::NotInteger {
            index,
            value: value.to_string(),
        })?;
    }
    Ok(out)
}

/// Integers pass through, finite floats truncate toward zero, numeric
/// strings parse. Everything else (bools, null, arrays) is rejected.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
