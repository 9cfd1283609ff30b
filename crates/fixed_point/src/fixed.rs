//! Scalar fixed-point conversion
//!
//! All conversions share a single rounding unit (round half to even on the
//! value scaled by `2^frac_bits`) and saturate at the format bounds, so
//! `decode(encode(x)) == quantize_to_float(x)` for every finite `x`.

use crate::error::{FixedPointError, Result};
use crate::format::FixedPointFormat;
use crate::pow2::exp2i;

/// Round to the nearest integer, ties to even
pub fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

/// Arithmetic shift with round-half-to-even.
///
/// Positive `shift` divides by `2^shift`, negative `shift` multiplies and
/// saturates at the `i64` bounds.
pub fn shift_round_half_even(value: i64, shift: i32) -> i64 {
    if shift <= 0 {
        let amount = shift.unsigned_abs();
        if value == 0 {
            return 0;
        }
        let saturated = if value > 0 { i64::MAX } else { i64::MIN };
        if amount >= 63 {
            return saturated;
        }
        return value.checked_mul(1i64 << amount).unwrap_or(saturated);
    }
    if shift >= 63 {
        return 0;
    }
    let quotient = value >> shift;
    let remainder = value - (quotient << shift);
    let half = 1i64 << (shift - 1);
    if remainder > half || (remainder == half && quotient & 1 == 1) {
        quotient + 1
    } else {
        quotient
    }
}

/// Encode a float as a fixed-point codeword.
///
/// Negative values use two's complement: `2^total - round(|x| * 2^frac)`.
/// Out-of-range values saturate to the largest or smallest codeword.
pub fn encode(value: f64, fmt: FixedPointFormat) -> Result<u32> {
    if value.is_nan() {
        return Err(FixedPointError::NonFinite { value });
    }
    if value > fmt.max_value() {
        return Ok(fmt.max_codeword());
    }
    if value < fmt.min_value() {
        return Ok(fmt.min_codeword());
    }

    let scale = exp2i(fmt.frac_bits() as i32);
    if value < 0.0 {
        let magnitude = round_half_even(value.abs() * scale) as u64;
        let modulus = 1u64 << fmt.total_bits();
        Ok(((modulus - magnitude) & fmt.mask() as u64) as u32)
    } else {
        Ok(round_half_even(value * scale) as u32)
    }
}

/// Decode a fixed-point codeword back to a float
pub fn decode(bits: u32, fmt: FixedPointFormat) -> Result<f64> {
    if bits & !fmt.mask() != 0 {
        return Err(FixedPointError::BitsOutOfRange {
            bits,
            total_bits: fmt.total_bits(),
        });
    }
    Ok(to_signed(bits, fmt) as f64 * fmt.lsb())
}

/// Round and saturate a float to the format, keeping it as a float
pub fn quantize_to_float(value: f64, fmt: FixedPointFormat) -> f64 {
    let scale = exp2i(fmt.frac_bits() as i32);
    let rounded = round_half_even(value * scale) / scale;
    rounded.clamp(fmt.min_value(), fmt.max_value())
}

/// Interpret a codeword as a signed integer (sign-extend for signed formats)
pub fn to_signed(bits: u32, fmt: FixedPointFormat) -> i64 {
    let bits = (bits & fmt.mask()) as i64;
    if fmt.is_signed() && bits & (1i64 << (fmt.total_bits() - 1)) != 0 {
        bits - (1i64 << fmt.total_bits())
    } else {
        bits
    }
}

/// Truncate a signed integer to a codeword of the format
pub fn from_signed(value: i64, fmt: FixedPointFormat) -> u32 {
    (value & fmt.mask() as i64) as u32
}

/// Zero-padded binary representation of a codeword
pub fn format_bits(bits: u32, fmt: FixedPointFormat) -> String {
    format!(
        "{:0width$b}",
        bits & fmt.mask(),
        width = fmt.total_bits() as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(int_bits: u8, frac_bits: u8) -> FixedPointFormat {
        FixedPointFormat::new(int_bits, frac_bits).unwrap()
    }

    #[test]
    fn test_encode_positive() {
        assert_eq!(encode(1.5, q(3, 5)).unwrap(), 0b0011_0000);
        assert_eq!(format_bits(encode(1.5, q(3, 5)).unwrap(), q(3, 5)), "00110000");
    }

    #[test]
    fn test_encode_negative() {
        assert_eq!(encode(-0.125, q(2, 6)).unwrap(), 0b1111_1000);
        assert_eq!(encode(-1.0, q(1, 7)).unwrap(), 0b1000_0000);
    }

    #[test]
    fn test_encode_rounds_half_to_even() {
        // Scaled values 2.5 and 3.5 land on 2 and 4
        assert_eq!(encode(2.5 / 32.0, q(3, 5)).unwrap(), 2);
        assert_eq!(encode(3.5 / 32.0, q(3, 5)).unwrap(), 4);
        assert_eq!(encode(-2.5 / 32.0, q(3, 5)).unwrap(), 256 - 2);
    }

    #[test]
    fn test_encode_saturates() {
        let fmt = q(3, 5);
        assert_eq!(encode(100.0, fmt).unwrap(), 0b0111_1111);
        assert_eq!(encode(-100.0, fmt).unwrap(), 0b1000_0000);
        assert_eq!(encode(f64::INFINITY, fmt).unwrap(), 0b0111_1111);
        assert_eq!(encode(-4.0, fmt).unwrap(), 0b1000_0000);
    }

    #[test]
    fn test_encode_tiny_negative_is_zero() {
        // Rounds to zero bits of precision: 2^8 - 0 wraps to 0
        assert_eq!(encode(-0.001, q(3, 5)).unwrap(), 0);
    }

    #[test]
    fn test_encode_nan() {
        assert!(matches!(
            encode(f64::NAN, q(3, 5)),
            Err(FixedPointError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_decode() {
        let fmt = q(3, 5);
        assert_eq!(decode(0b0011_0000, fmt).unwrap(), 1.5);
        assert_eq!(decode(0b1000_0000, fmt).unwrap(), -4.0);
        assert_eq!(decode(0b0111_1111, fmt).unwrap(), 4.0 - 1.0 / 32.0);
        assert!(matches!(
            decode(0x100, fmt),
            Err(FixedPointError::BitsOutOfRange { .. })
        ));
    }

    #[test]
    fn test_unsigned_roundtrip() {
        let fmt = FixedPointFormat::unsigned(8, 0).unwrap();
        assert_eq!(encode(200.0, fmt).unwrap(), 200);
        assert_eq!(decode(200, fmt).unwrap(), 200.0);
        assert_eq!(encode(-3.0, fmt).unwrap(), 0);
        assert_eq!(encode(300.0, fmt).unwrap(), 255);
    }

    #[test]
    fn test_quantize_to_float() {
        let fmt = q(3, 5);
        assert_eq!(quantize_to_float(1.51, fmt), 1.5);
        assert_eq!(quantize_to_float(10.0, fmt), fmt.max_value());
        assert_eq!(quantize_to_float(-10.0, fmt), -4.0);
        let once = quantize_to_float(0.7777, fmt);
        assert_eq!(quantize_to_float(once, fmt), once);
    }

    #[test]
    fn test_roundtrip_matches_quantize_to_float() {
        let fmt = q(4, 4);
        for &v in &[0.0, 0.03, -0.03, 1.96875, -7.999, 7.97, 8.5, -9.0, 3.03125] {
            let back = decode(encode(v, fmt).unwrap(), fmt).unwrap();
            assert_eq!(back, quantize_to_float(v, fmt), "value {}", v);
        }
    }

    #[test]
    fn test_signed_conversions() {
        let fmt = q(2, 6);
        assert_eq!(to_signed(0b1111_1000, fmt), -8);
        assert_eq!(to_signed(0b0000_1000, fmt), 8);
        assert_eq!(from_signed(-8, fmt), 0b1111_1000);
        assert_eq!(from_signed(-128, fmt), 0b1000_0000);
    }

    #[test]
    fn test_shift_round_half_even() {
        assert_eq!(shift_round_half_even(5, 1), 2); // 2.5 -> 2
        assert_eq!(shift_round_half_even(7, 1), 4); // 3.5 -> 4
        assert_eq!(shift_round_half_even(-5, 1), -2); // -2.5 -> -2
        assert_eq!(shift_round_half_even(-7, 1), -4); // -3.5 -> -4
        assert_eq!(shift_round_half_even(13, 2), 3); // 3.25 -> 3
        assert_eq!(shift_round_half_even(-13, 2), -3);
        assert_eq!(shift_round_half_even(3, -2), 12);
        assert_eq!(shift_round_half_even(3, 0), 3);
    }

    #[test]
    fn test_shift_left_saturates() {
        assert_eq!(shift_round_half_even(1, -62), 1i64 << 62);
        assert_eq!(shift_round_half_even(2, -62), i64::MAX);
        assert_eq!(shift_round_half_even(1, -64), i64::MAX);
        assert_eq!(shift_round_half_even(-3, -70), i64::MIN);
        assert_eq!(shift_round_half_even(0, i32::MIN), 0);
        assert_eq!(shift_round_half_even(-1, 80), 0);
    }
}
