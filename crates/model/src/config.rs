//! Quantization configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use fixcnn_fixed_point::{is_power_of_two, MAX_TOTAL_BITS};

use crate::error::{ModelError, Result};

/// Settings shared by the rewriter and the interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantConfig {
    /// Total width of weight and bias formats; also bounds the output scale
    #[serde(default = "default_weight_bits")]
    pub weight_bits: u8,

    /// Signed width of integer activations
    #[serde(default = "default_activation_bits")]
    pub activation_bits: u8,

    /// LeakyRelu slope for nodes without an `alpha` attribute
    #[serde(default = "default_leaky_relu_slope")]
    pub leaky_relu_slope: f64,

    /// Operation-set version written after a rewrite
    #[serde(default = "default_quantized_opset")]
    pub quantized_opset: i64,

    /// Scale of the first quantized activation
    #[serde(default = "default_input_scale")]
    pub input_scale: f64,
}

fn default_weight_bits() -> u8 { 8 }
fn default_activation_bits() -> u8 { 16 }
fn default_leaky_relu_slope() -> f64 { 0.125 }
fn default_quantized_opset() -> i64 { 11 }
fn default_input_scale() -> f64 { 1.0 }

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            weight_bits: default_weight_bits(),
            activation_bits: default_activation_bits(),
            leaky_relu_slope: default_leaky_relu_slope(),
            quantized_opset: default_quantized_opset(),
            input_scale: default_input_scale(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl QuantConfig {
    /// Load config from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overridden by `FIXCNN_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `FIXCNN_*` environment variables.
    ///
    /// Unparsable values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("FIXCNN_WEIGHT_BITS") {
            self.weight_bits = v;
        }
        if let Some(v) = env_parse("FIXCNN_ACTIVATION_BITS") {
            self.activation_bits = v;
        }
        if let Some(v) = env_parse("FIXCNN_LEAKY_RELU_SLOPE") {
            self.leaky_relu_slope = v;
        }
        if let Some(v) = env_parse("FIXCNN_QUANTIZED_OPSET") {
            self.quantized_opset = v;
        }
        if let Some(v) = env_parse("FIXCNN_INPUT_SCALE") {
            self.input_scale = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, bits) in [
            ("weight_bits", self.weight_bits),
            ("activation_bits", self.activation_bits),
        ] {
            if bits == 0 || bits > MAX_TOTAL_BITS {
                return Err(ModelError::Config(format!(
                    "{} ({}) must be within 1..={}",
                    name, bits, MAX_TOTAL_BITS
                )));
            }
        }
        if !(self.input_scale > 0.0 && is_power_of_two(self.input_scale)) {
            return Err(ModelError::Config(format!(
                "input_scale ({}) must be a positive power of two",
                self.input_scale
            )));
        }
        if !(self.leaky_relu_slope > 0.0 && self.leaky_relu_slope < 1.0) {
            return Err(ModelError::Config(format!(
                "leaky_relu_slope ({}) must be within (0, 1)",
                self.leaky_relu_slope
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = QuantConfig::default();
        assert_eq!(config.weight_bits, 8);
        assert_eq!(config.activation_bits, 16);
        assert_eq!(config.leaky_relu_slope, 0.125);
        assert_eq!(config.quantized_opset, 11);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects() {
        let config = QuantConfig { weight_bits: 0, ..Default::default() };
        assert!(config.validate().is_err());
        let config = QuantConfig { activation_bits: 33, ..Default::default() };
        assert!(config.validate().is_err());
        let config = QuantConfig { input_scale: 0.3, ..Default::default() };
        assert!(config.validate().is_err());
        let config = QuantConfig { leaky_relu_slope: 1.5, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"weight_bits": 6, "input_scale": 0.5}}"#).unwrap();
        let config = QuantConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.weight_bits, 6);
        assert_eq!(config.input_scale, 0.5);
        assert_eq!(config.activation_bits, 16);
        config.validate().unwrap();
    }
}
