use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

/// Credits granted to every account per window when no override is in place.
pub const DEFAULT_ALLOWANCE: u32 = 3;

/// Balance of one quota record, replacing the historical sign convention:
/// a non-negative stored integer was usage against the fixed allowance, a
/// negative one an administratively set absolute remaining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Balance {
    /// Consumption events recorded against the fixed allowance.
    Usage(u32),
    /// Absolute remaining credits, set by `grant`. Never zero: a spent
    /// override is stored as `Usage(allowance)` because `-0` is
    /// indistinguishable from an untouched usage counter on the wire.
    Override(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaRecord {
    /// When the current accounting window began (unix ms). Informational:
    /// nothing replenishes on window rollover.
    pub window_start: i64,
    pub balance: Balance,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized quota record shape")]
    UnrecognizedShape,
    #[error("quota integer out of range: {0}")]
    OutOfRange(i64),
    #[error("unparsable quota text: {0:?}")]
    BadText(String),
}

impl QuotaRecord {
    /// The record every untouched account logically holds.
    pub fn fresh(window_start: i64) -> Self {
        Self {
            window_start,
            balance: Balance::Usage(0),
        }
    }

    /// A record projecting exactly `remaining` credits. Zero cannot be an
    /// override on the wire, so it is realized as a fully spent allowance.
    pub fn with_remaining(remaining: u32, allowance: u32, window_start: i64) -> Self {
        let balance = if remaining == 0 {
            Balance::Usage(allowance)
        } else {
            Balance::Override(remaining)
        };
        Self {
            window_start,
            balance,
        }
    }

    pub fn remaining(&self, allowance: u32) -> u32 {
        match self.balance {
            Balance::Usage(used) => allowance.saturating_sub(used),
            Balance::Override(remaining) => remaining,
        }
    }

    /// One consumption step. `None` means the record is already empty and
    /// the consume must be refused.
    pub fn consume(&self, allowance: u32) -> Option<Self> {
        let balance = match self.balance {
            Balance::Usage(used) if used < allowance => Balance::Usage(used + 1),
            Balance::Usage(_) => return None,
            Balance::Override(0) => return None,
            // Spending the last override credit lands on remaining == 0,
            // which only the usage form can encode.
            Balance::Override(1) => Balance::Usage(allowance),
            Balance::Override(remaining) => Balance::Override(remaining - 1),
        };
        Some(Self {
            window_start: self.window_start,
            balance,
        })
    }

    /// Canonical wire form. New writes always use the JSON pair; the legacy
    /// shapes below are decode-only.
    pub fn encode(&self) -> Value {
        let raw = match self.balance {
            Balance::Usage(used) => used as i64,
            Balance::Override(remaining) => -(remaining as i64),
        };
        json!([self.window_start, raw])
    }

    /// Decode any physical encoding ever written for a quota record:
    /// pair-as-structure, pair-as-JSON-text, pair-as-comma-text, bare
    /// integer, or an object carrying `remaining` directly (the shape of
    /// the retired secondary key).
    pub fn decode(raw: &Value) -> Result<Self, DecodeError> {
        Self::decode_inner(raw, 0)
    }

    /// Decode the physical stored text. Valid JSON is interpreted
    /// structurally; anything else goes through the plain-text shapes.
    pub fn decode_stored(raw: &str) -> Result<Self, DecodeError> {
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => Self::decode(&value),
            Err(_) => Self::decode(&Value::String(raw.to_string())),
        }
    }

    fn decode_inner(raw: &Value, depth: u8) -> Result<Self, DecodeError> {
        match raw {
            Value::Array(items) if items.len() == 2 => {
                let window_start = integer_of(&items[0])?;
                let stored = integer_of(&items[1])?;
                Ok(Self {
                    window_start,
                    balance: balance_of(stored)?,
                })
            }
            Value::Number(_) => {
                let stored = integer_of(raw)?;
                Ok(Self {
                    window_start: 0,
                    balance: balance_of(stored)?,
                })
            }
            Value::String(text) => Self::decode_text(text, depth),
            Value::Object(fields) => {
                let remaining = fields
                    .get("remaining")
                    .ok_or(DecodeError::UnrecognizedShape)?;
                let remaining = integer_of(remaining)?;
                if !(0..=i64::from(u32::MAX)).contains(&remaining) {
                    return Err(DecodeError::OutOfRange(remaining));
                }
                Ok(Self::with_remaining(remaining as u32, DEFAULT_ALLOWANCE, 0))
            }
            _ => Err(DecodeError::UnrecognizedShape),
        }
    }

    fn decode_text(text: &str, depth: u8) -> Result<Self, DecodeError> {
        let trimmed = text.trim();
        if depth == 0 {
            if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                if let Ok(record) = Self::decode_inner(&parsed, 1) {
                    return Ok(record);
                }
            }
        }
        match trimmed.split_once(',') {
            Some((window, stored)) => {
                let window_start = window
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| DecodeError::BadText(text.to_string()))?;
                let stored = stored
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| DecodeError::BadText(text.to_string()))?;
                Ok(Self {
                    window_start,
                    balance: balance_of(stored)?,
                })
            }
            None => {
                let stored = trimmed
                    .parse::<i64>()
                    .map_err(|_| DecodeError::BadText(text.to_string()))?;
                Ok(Self {
                    window_start: 0,
                    balance: balance_of(stored)?,
                })
            }
        }
    }
}

fn balance_of(stored: i64) -> Result<Balance, DecodeError> {
    if (0..=i64::from(u32::MAX)).contains(&stored) {
        Ok(Balance::Usage(stored as u32))
    } else if (-i64::from(u32::MAX)..0).contains(&stored) {
        Ok(Balance::Override((-stored) as u32))
    } else {
        Err(DecodeError::OutOfRange(stored))
    }
}

fn integer_of(value: &Value) -> Result<i64, DecodeError> {
    match value {
        Value::Number(number) => number.as_i64().ok_or(DecodeError::UnrecognizedShape),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| DecodeError::BadText(text.clone())),
        _ => Err(DecodeError::UnrecognizedShape),
    }
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
