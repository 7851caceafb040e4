//! Op-mode state machine
//!
//! A quantizer is always in exactly one [`OpMode`]; an `enabled = false` flag
//! overrides it with [`OpMode::PassThrough`]. Mode and flag are packed into one
//! atomic byte so a call reads a single consistent snapshot. There are no
//! autonomous transitions: only the setters change state.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::Error;

/// What a quantizer does with each buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OpMode {
    /// Copy input to output unchanged
    PassThrough = 0,
    /// Accumulate running min/max; output equals input
    #[default]
    UpdateStats = 1,
    /// Apply the frozen encoding
    QuantizeDequantize = 2,
    /// Derive an encoding from this buffer alone, then apply it
    OneShotQuantizeDequantize = 3,
}

impl TryFrom<u8> for OpMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OpMode::PassThrough),
            1 => Ok(OpMode::UpdateStats),
            2 => Ok(OpMode::QuantizeDequantize),
            3 => Ok(OpMode::OneShotQuantizeDequantize),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown op mode value {other}"
            ))),
        }
    }
}

const MODE_MASK: u8 = 0b0000_0011;
const ENABLED_BIT: u8 = 0b1000_0000;

/// One consistent view of mode state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeSnapshot {
    pub op_mode: OpMode,
    pub enabled: bool,
}

impl ModeSnapshot {
    /// The behavior a call actually runs; disabled always means pass-through
    pub fn effective(&self) -> OpMode {
        if self.enabled {
            self.op_mode
        } else {
            OpMode::PassThrough
        }
    }

    fn pack(self) -> u8 {
        let enabled = if self.enabled { ENABLED_BIT } else { 0 };
        self.op_mode as u8 | enabled
    }

    fn unpack(bits: u8) -> Self {
        let op_mode = match bits & MODE_MASK {
            0 => OpMode::PassThrough,
            1 => OpMode::UpdateStats,
            2 => OpMode::QuantizeDequantize,
            _ => OpMode::OneShotQuantizeDequantize,
        };
        Self {
            op_mode,
            enabled: bits & ENABLED_BIT != 0,
        }
    }
}

/// Atomic op-mode and enabled flag
#[derive(Debug)]
pub struct ModeState {
    bits: AtomicU8,
}

impl ModeState {
    pub fn new(op_mode: OpMode, enabled: bool) -> Self {
        Self {
            bits: AtomicU8::new(ModeSnapshot { op_mode, enabled }.pack()),
        }
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        ModeSnapshot::unpack(self.bits.load(Ordering::Acquire))
    }

    /// Returns the previous mode
    pub fn set_op_mode(&self, op_mode: OpMode) -> OpMode {
        let prev = self.update(|s| ModeSnapshot { op_mode, ..s });
        prev.op_mode
    }

    /// Returns the previous flag
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let prev = self.update(|s| ModeSnapshot { enabled, ..s });
        prev.enabled
    }

    fn update(&self, f: impl Fn(ModeSnapshot) -> ModeSnapshot) -> ModeSnapshot {
        let prev = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(f(ModeSnapshot::unpack(bits)).pack())
            })
            .unwrap_or_else(|bits| bits);
        ModeSnapshot::unpack(prev)
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new(OpMode::default(), true)
    }
}
