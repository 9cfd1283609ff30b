//! Per-layer weight analysis
//!
//! Chooses the integer/fraction split that covers the largest weight or
//! bias magnitude of a layer under a fixed total width, then quantizes both
//! tensors at that format.

use serde::Serialize;
use tracing::debug;

use fixcnn_fixed_point::{encode, is_power_of_two, to_signed, FixedPointFormat};
use fixcnn_model::{DType, ModelError, Tensor};

use crate::error::{QuantizeError, Result};
use crate::params::QuantParams;

/// Signed integer bits needed to hold `value` without overflow.
///
/// `ceil(max(log2(value), 0)) + 1`, capped at `max_bits` and never below 1.
/// Zero and negative inputs need only the sign bit.
pub fn integer_width(value: f64, max_bits: u8) -> u8 {
    if !(value > 0.0) {
        return 1;
    }
    let magnitude_bits = value.log2().max(0.0).ceil();
    let bits = (magnitude_bits + 1.0).min(max_bits as f64);
    (bits as u8).max(1)
}

/// Diagnostics of a quantized weight tensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeightStats {
    pub total: usize,
    pub zero_count: usize,
    /// Weights that are exact powers of two after quantization
    pub pow2_count: usize,
    pub remaining_count: usize,
    pub max_value: f64,
    pub min_value: f64,
    /// Largest magnitude over weights and bias
    pub highest_value: f64,
    pub mean_abs_error: f64,
    /// Mean absolute quantized weight; drives output scale propagation
    pub mean_abs_value: f64,
}

impl WeightStats {
    fn ratio(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64
        }
    }

    pub fn zero_fraction(&self) -> f64 {
        self.ratio(self.zero_count)
    }

    pub fn pow2_fraction(&self) -> f64 {
        self.ratio(self.pow2_count)
    }

    pub fn remaining_fraction(&self) -> f64 {
        self.ratio(self.remaining_count)
    }
}

/// Quantized weights and bias of one convolution
#[derive(Debug, Clone)]
pub struct LayerQuantization {
    pub format: FixedPointFormat,
    /// Sign-extended weight codewords
    pub weights: Tensor,
    /// Sign-extended bias codewords, same format as the weights
    pub bias: Tensor,
    pub stats: WeightStats,
}

impl LayerQuantization {
    /// Weight quantization parameters: `scale = 2^-frac_bits`
    pub fn params(&self) -> QuantParams {
        QuantParams::from_format(self.format)
    }
}

fn float_values<'t>(node: &str, name: &str, tensor: &'t Tensor) -> Result<&'t [f64]> {
    let values = tensor.as_float().ok_or_else(|| {
        QuantizeError::Model(ModelError::InvalidDtype {
            expected: DType::F32.to_string(),
            got: tensor.dtype().to_string(),
        })
    })?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(QuantizeError::NonFiniteTensor {
            node: node.to_string(),
            name: name.to_string(),
        });
    }
    Ok(values)
}

fn quantize_values(values: &[f64], format: FixedPointFormat) -> Result<Vec<i64>> {
    values
        .iter()
        .map(|&v| Ok(to_signed(encode(v, format)?, format)))
        .collect()
}

/// Pick a format for `weights` and `bias` under `total_bits` and quantize
/// both.
///
/// An all-zero layer falls back to one integer bit.
pub fn analyze_and_quantize(
    node: &str,
    weights: &Tensor,
    bias: &Tensor,
    total_bits: u8,
) -> Result<LayerQuantization> {
    let w = float_values(node, "weights", weights)?;
    let b = float_values(node, "bias", bias)?;
    if w.is_empty() {
        return Err(QuantizeError::MalformedNode {
            node: node.to_string(),
            reason: "empty weight tensor".to_string(),
        });
    }

    let (min_value, max_value) = w
        .iter()
        .chain(b)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let highest_value = max_value.abs().max(min_value.abs());
    let int_bits = integer_width(highest_value, total_bits);
    let format = FixedPointFormat::with_total_bits(total_bits, int_bits)?;

    let weight_codes = quantize_values(w, format)?;
    let bias_codes = quantize_values(b, format)?;

    let lsb = format.lsb();
    let mut stats = WeightStats {
        total: w.len(),
        max_value,
        min_value,
        highest_value,
        ..Default::default()
    };
    let mut abs_error = 0.0;
    let mut abs_value = 0.0;
    for (&original, &code) in w.iter().zip(&weight_codes) {
        let quantized = code as f64 * lsb;
        abs_error += (original - quantized).abs();
        abs_value += quantized.abs();
        if code == 0 {
            stats.zero_count += 1;
        } else if is_power_of_two(quantized) {
            stats.pow2_count += 1;
        }
    }
    stats.remaining_count = stats.total - stats.zero_count - stats.pow2_count;
    stats.mean_abs_error = abs_error / stats.total as f64;
    stats.mean_abs_value = abs_value / stats.total as f64;

    debug!(
        node,
        format = %format,
        highest = highest_value,
        zero = stats.zero_fraction(),
        pow2 = stats.pow2_fraction(),
        mean_abs_error = stats.mean_abs_error,
        mean_abs_value = stats.mean_abs_value,
        "analyzed layer weights"
    );

    let weights = Tensor::int(
        weights.shape().to_vec(),
        DType::signed_for_bits(total_bits),
        weight_codes,
    )?;
    let bias = Tensor::int(bias.shape().to_vec(), DType::I32, bias_codes)?;

    Ok(LayerQuantization {
        format,
        weights,
        bias,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn float(values: &[f64]) -> Tensor {
        Tensor::float(vec![values.len()], values.to_vec()).unwrap()
    }

    #[test]
    fn test_integer_width() {
        assert_eq!(integer_width(0.1, 8), 1);
        assert_eq!(integer_width(1.5, 8), 2);
        assert_eq!(integer_width(3.3, 8), 3);
        assert_eq!(integer_width(4.0, 8), 3);
        assert_eq!(integer_width(122.0, 8), 8);
        assert_eq!(integer_width(1000.0, 8), 8);
        assert_eq!(integer_width(0.0, 8), 1);
    }

    #[test]
    fn test_format_selection() {
        let layer = analyze_and_quantize("conv", &float(&[-4.0, 4.0, 2.0, -2.0]), &float(&[0.0]), 8)
            .unwrap();
        assert_eq!(layer.format.int_bits(), 3);
        assert_eq!(layer.format.frac_bits(), 5);
        assert_eq!(layer.params().scale(), 1.0 / 32.0);
        // 4.0 saturates to the largest Q3.5 codeword
        assert_eq!(layer.weights.as_int().unwrap(), &[-128, 127, 64, -64]);
        assert_eq!(layer.weights.dtype(), DType::I8);
        assert_eq!(layer.bias.dtype(), DType::I32);
        assert_eq!(layer.bias.as_int().unwrap(), &[0]);
    }

    #[test]
    fn test_stats() {
        let layer = analyze_and_quantize(
            "conv",
            &float(&[0.5, 0.0, -0.25, 0.375]),
            &float(&[0.1]),
            8,
        )
        .unwrap();
        let stats = layer.stats;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.zero_count, 1);
        assert_eq!(stats.pow2_count, 2);
        assert_eq!(stats.remaining_count, 1);
        assert_eq!(stats.mean_abs_error, 0.0);
        assert_eq!(stats.mean_abs_value, 1.125 / 4.0);
        assert_eq!(stats.zero_fraction(), 0.25);
    }

    #[test]
    fn test_all_zero_layer_falls_back() {
        let layer = analyze_and_quantize("conv", &float(&[0.0; 9]), &float(&[0.0]), 8).unwrap();
        assert_eq!(layer.format.int_bits(), 1);
        assert_eq!(layer.format.frac_bits(), 7);
        assert_eq!(layer.stats.mean_abs_value, 0.0);
        assert!(layer.weights.as_int().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_rejects_bad_tensors() {
        assert!(matches!(
            analyze_and_quantize("conv", &float(&[f64::NAN]), &float(&[0.0]), 8),
            Err(QuantizeError::NonFiniteTensor { .. })
        ));
        let ints = Tensor::int(vec![1], DType::I8, vec![1]).unwrap();
        assert!(matches!(
            analyze_and_quantize("conv", &ints, &float(&[0.0]), 8),
            Err(QuantizeError::Model(_))
        ));
        assert!(matches!(
            analyze_and_quantize("conv", &float(&[]), &float(&[]), 8),
            Err(QuantizeError::MalformedNode { .. })
        ));
    }

    #[test]
    fn test_quantized_values_cover_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..10 {
            let scale: f64 = rng.gen_range(0.01..50.0);
            let values: Vec<f64> = (0..32).map(|_| rng.gen_range(-scale..scale)).collect();
            let layer = analyze_and_quantize("conv", &float(&values), &float(&[0.0]), 8).unwrap();
            let fmt = layer.format;
            for &code in layer.weights.as_int().unwrap() {
                let value = code as f64 * fmt.lsb();
                assert!(value >= fmt.min_value() && value <= fmt.max_value());
            }
        }
    }
}
