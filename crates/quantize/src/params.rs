//! Power-of-two quantization parameters

use std::fmt;

use serde::Serialize;

use fixcnn_fixed_point::{exact_log2, FixedPointFormat};
use fixcnn_model::{DType, Tensor, WeightsTable};

use crate::error::{QuantizeError, Result};

/// Symmetric quantization parameters: `real = int * scale`.
///
/// `scale` is always a positive exact power of two and `zero_point` is
/// always 0; both are checked on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantParams {
    scale: f64,
    zero_point: i64,
    #[serde(skip)]
    exponent: i32,
}

impl QuantParams {
    /// Validate and build
    pub fn new(scale: f64, zero_point: i64) -> Result<Self> {
        let invalid = |reason| QuantizeError::InvalidQuantParams {
            scale,
            zero_point,
            reason,
        };
        if zero_point != 0 {
            return Err(invalid("only zero point 0 is supported"));
        }
        if !(scale > 0.0) {
            return Err(invalid("scale must be positive"));
        }
        let exponent = exact_log2(scale).ok_or_else(|| invalid("scale must be a power of two"))?;
        Ok(Self {
            scale,
            zero_point,
            exponent,
        })
    }

    /// `scale = 2^exponent`
    pub fn from_exponent(exponent: i32) -> Self {
        Self {
            scale: 2f64.powi(exponent),
            zero_point: 0,
            exponent,
        }
    }

    /// Parameters equivalent to a fixed-point format: `scale = 2^-frac_bits`
    pub fn from_format(format: FixedPointFormat) -> Self {
        Self::from_exponent(-(format.frac_bits() as i32))
    }

    /// Read and validate the `(scale, zero_point)` initializer pair of a node
    pub fn from_initializers(
        table: &WeightsTable<'_>,
        node: &str,
        scale_name: &str,
        zero_point_name: &str,
    ) -> Result<Self> {
        let scale = table.scalar(node, scale_name)?;
        let zero_point = table.scalar(node, zero_point_name)?;
        if zero_point.fract() != 0.0 {
            return Err(QuantizeError::InvalidQuantParams {
                scale,
                zero_point: zero_point as i64,
                reason: "zero point must be an integer",
            });
        }
        Self::new(scale, zero_point as i64)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn zero_point(&self) -> i64 {
        self.zero_point
    }

    /// `log2(scale)`, exact by construction
    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Scale and zero-point initializers; the zero point's dtype is the
    /// integer type of the quantized tensor
    pub fn to_tensors(&self, zero_point_dtype: DType) -> Result<(Tensor, Tensor)> {
        let scale = Tensor::scalar_float(self.scale);
        let zero_point = Tensor::scalar_int(zero_point_dtype, self.zero_point)?;
        Ok((scale, zero_point))
    }
}

impl fmt::Display for QuantParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "2^{}", self.exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixcnn_model::ComputationGraph;

    #[test]
    fn test_valid_params() {
        let p = QuantParams::new(0.125, 0).unwrap();
        assert_eq!(p.exponent(), -3);
        let p = QuantParams::new(256.0, 0).unwrap();
        assert_eq!(p.exponent(), 8);
        assert_eq!(p.to_string(), "2^8");
    }

    #[test]
    fn test_rejects_hand_crafted() {
        for (scale, zp) in [(3.0, 0), (0.3, 0), (0.0, 0), (-0.5, 0), (f64::NAN, 0), (1.0, 1)] {
            assert!(
                matches!(
                    QuantParams::new(scale, zp),
                    Err(QuantizeError::InvalidQuantParams { .. })
                ),
                "scale {} zero point {} accepted",
                scale,
                zp
            );
        }
    }

    #[test]
    fn test_from_format() {
        let fmt = FixedPointFormat::new(3, 5).unwrap();
        let p = QuantParams::from_format(fmt);
        assert_eq!(p.scale(), 1.0 / 32.0);
        assert_eq!(p.zero_point(), 0);
    }

    #[test]
    fn test_initializer_roundtrip() {
        let p = QuantParams::from_exponent(-4);
        let (scale, zp) = p.to_tensors(DType::I8).unwrap();
        assert_eq!(zp.dtype(), DType::I8);

        let mut graph = ComputationGraph::new("g");
        graph.initializers.insert("s".into(), scale);
        graph.initializers.insert("zp".into(), zp);
        graph
            .initializers
            .insert("bad".into(), Tensor::scalar_float(0.2));
        let table = graph.weights_table();
        assert_eq!(QuantParams::from_initializers(&table, "n", "s", "zp").unwrap(), p);
        assert!(QuantParams::from_initializers(&table, "n", "bad", "zp").is_err());
        assert!(matches!(
            QuantParams::from_initializers(&table, "n", "gone", "zp"),
            Err(QuantizeError::Model(_))
        ));
    }
}
