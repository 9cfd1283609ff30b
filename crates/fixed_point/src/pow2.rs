//! Power-of-two helpers
//!
//! Scales in a quantized graph are restricted to exact powers of two so the
//! hardware can apply them as shifts. These helpers test that property
//! exactly (on the IEEE-754 bit pattern, not through a rounded `log2`) and
//! produce the sign + exponent code used for power-of-two weights.

use crate::error::{FixedPointError, Result};
use crate::fixed::round_half_even;

/// Width of the exponent magnitude field in a `Pow2Code`
pub const POW2_FIELD_BITS: u8 = 3;

const MANTISSA_BITS: u32 = 52;
const MANTISSA_MASK: u64 = (1 << MANTISSA_BITS) - 1;
const EXPONENT_BIAS: i32 = 1023;

/// Exact 2^exp for the exponents the codec works with
pub(crate) fn exp2i(exp: i32) -> f64 {
    2f64.powi(exp)
}

/// Return `e` when `|value| == 2^e` exactly
pub fn exact_log2(value: f64) -> Option<i32> {
    if !value.is_finite() || value == 0.0 {
        return None;
    }
    let bits = value.abs().to_bits();
    let biased = (bits >> MANTISSA_BITS) as i32;
    let mantissa = bits & MANTISSA_MASK;
    if biased == 0 {
        // Subnormal: a single mantissa bit set
        if mantissa.count_ones() == 1 {
            let position = mantissa.trailing_zeros() as i32;
            return Some(position - EXPONENT_BIAS + 1 - MANTISSA_BITS as i32);
        }
        return None;
    }
    (mantissa == 0).then_some(biased - EXPONENT_BIAS)
}

/// Whether `|value|` is an exact power of two (zero is not)
pub fn is_power_of_two(value: f64) -> bool {
    exact_log2(value).is_some()
}

/// Power-of-two approximation of a value: sign plus rounded exponent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pow2Code {
    pub negative: bool,
    pub exponent: i32,
}

impl Pow2Code {
    /// Value represented by this code
    pub fn value(&self) -> f64 {
        let magnitude = exp2i(self.exponent);
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Encode as `sign ++ (|exponent| - 1)` with a `POW2_FIELD_BITS` magnitude field
    pub fn bits(&self) -> Result<u32> {
        let magnitude = self.exponent.unsigned_abs();
        if magnitude == 0 || magnitude > (1 << POW2_FIELD_BITS) {
            return Err(FixedPointError::ExponentField {
                exponent: self.exponent,
                field_bits: POW2_FIELD_BITS,
            });
        }
        let sign = u32::from(self.negative) << POW2_FIELD_BITS;
        Ok(sign | (magnitude - 1))
    }
}

/// Snap a value to the nearest power of two.
///
/// The exponent is `log2(|value|)` rounded half-to-even and clamped to
/// `[min_exp, max_exp]`. Zero maps to `min_exp`.
pub fn power_of_two_exponent(value: f64, min_exp: i32, max_exp: i32) -> Result<Pow2Code> {
    if min_exp > max_exp {
        return Err(FixedPointError::ExponentRange { min_exp, max_exp });
    }
    if value.is_nan() {
        return Err(FixedPointError::NonFinite { value });
    }
    let exponent = if value == 0.0 {
        min_exp
    } else {
        let rounded = round_half_even(value.abs().log2());
        rounded.clamp(min_exp as f64, max_exp as f64) as i32
    };
    Ok(Pow2Code {
        negative: value < 0.0,
        exponent,
    })
}
