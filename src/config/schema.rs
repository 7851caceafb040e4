//! Schema definitions for declarative quantization-simulation configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::quant::{OpMode, RoundingMode};

/// Per-quantizer configuration
///
/// Set once at attach time; every field stays mutable on the live quantizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizerConfig {
    /// Grid bitwidth (1-32; symmetric needs at least 2)
    #[serde(default = "default_bitwidth")]
    pub bitwidth: u8,

    /// Zero-centered grid with offset 0
    #[serde(default)]
    pub symmetric: bool,

    #[serde(default)]
    pub rounding_mode: RoundingMode,

    /// Disabled quantizers pass data through regardless of `op_mode`
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub op_mode: OpMode,

    /// Backend selected at construction
    #[serde(default)]
    pub device: Device,

    /// Seed for stochastic rounding; random when absent. When set in the
    /// defaults of a [`QuantSimConfig`], each tensor derives its own seed from it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl QuantizerConfig {
    pub fn new(bitwidth: u8, symmetric: bool) -> Self {
        Self {
            bitwidth,
            symmetric,
            ..Self::default()
        }
    }

    pub fn with_rounding_mode(mut self, rounding_mode: RoundingMode) -> Self {
        self.rounding_mode = rounding_mode;
        self
    }

    pub fn with_op_mode(mut self, op_mode: OpMode) -> Self {
        self.op_mode = op_mode;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            bitwidth: default_bitwidth(),
            symmetric: false,
            rounding_mode: RoundingMode::default(),
            enabled: true,
            op_mode: OpMode::default(),
            device: Device::default(),
            seed: None,
        }
    }
}

/// Partial configuration layered over the defaults for one tensor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitwidth: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symmetric: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding_mode: Option<RoundingMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_mode: Option<OpMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl QuantizerOverride {
    /// Resolve against a base configuration
    pub fn apply(&self, base: &QuantizerConfig) -> QuantizerConfig {
        QuantizerConfig {
            bitwidth: self.bitwidth.unwrap_or(base.bitwidth),
            symmetric: self.symmetric.unwrap_or(base.symmetric),
            rounding_mode: self.rounding_mode.unwrap_or(base.rounding_mode),
            enabled: self.enabled.unwrap_or(base.enabled),
            op_mode: self.op_mode.unwrap_or(base.op_mode),
            device: self.device.unwrap_or(base.device),
            seed: self.seed.or(base.seed),
        }
    }
}

/// Complete simulation configuration: defaults plus named tensors
///
/// ```yaml
/// defaults:
///   bitwidth: 8
///   rounding_mode: nearest
///
/// activations:
///   conv1.output: {}
///   fc.output:
///     enabled: false
///
/// params:
///   conv1.weight:
///     symmetric: true
///     op_mode: one_shot_quantize_dequantize
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantSimConfig {
    #[serde(default)]
    pub defaults: QuantizerConfig,

    #[serde(default)]
    pub activations: BTreeMap<String, QuantizerOverride>,

    #[serde(default)]
    pub params: BTreeMap<String, QuantizerOverride>,
}

fn default_true() -> bool {
    true
}

fn default_bitwidth() -> u8 {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_quantizer_config() {
        let config: QuantizerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, QuantizerConfig::default());
        assert_eq!(config.bitwidth, 8);
        assert!(config.enabled);
        assert_eq!(config.op_mode, OpMode::UpdateStats);
    }

    #[test]
    fn test_deserialize_full_quantizer_config() {
        let yaml = r#"
bitwidth: 4
symmetric: true
rounding_mode: stochastic
enabled: false
op_mode: quantize_dequantize
device: parallel
seed: 17
"#;
        let config: QuantizerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config,
            QuantizerConfig::new(4, true)
                .with_rounding_mode(RoundingMode::Stochastic)
                .with_enabled(false)
                .with_op_mode(OpMode::QuantizeDequantize)
                .with_device(Device::Parallel)
                .with_seed(17)
        );
    }

    #[test]
    fn test_override_apply() {
        let base = QuantizerConfig::new(8, false).with_seed(1);
        let over = QuantizerOverride {
            bitwidth: Some(4),
            enabled: Some(false),
            ..Default::default()
        };

        let resolved = over.apply(&base);
        assert_eq!(resolved.bitwidth, 4);
        assert!(!resolved.enabled);
        assert!(!resolved.symmetric);
        assert_eq!(resolved.seed, Some(1));
    }

    #[test]
    fn test_seed_omitted_when_absent() {
        let yaml = serde_yaml::to_string(&QuantizerConfig::default()).unwrap();
        assert!(!yaml.contains("seed"));
    }
}
