//! Property-based tests for the fixed-point codec.
//!
//! Key invariants:
//! - decode(encode(v)) equals quantize_to_float(v)
//! - out-of-range values saturate to the extreme codewords
//! - quantize_to_float is idempotent
//! - every quantized value stays within the format bounds

use fixcnn_fixed_point::{
    decode, encode, from_signed, quantize_to_float, shift_round_half_even, to_signed,
    FixedPointFormat,
};
use proptest::prelude::*;

fn signed_format() -> impl Strategy<Value = FixedPointFormat> {
    (1u8..=16, 0u8..=16).prop_map(|(int_bits, frac_bits)| {
        FixedPointFormat::new(int_bits, frac_bits).expect("valid by construction")
    })
}

fn any_format() -> impl Strategy<Value = FixedPointFormat> {
    (1u8..=16, 0u8..=16, any::<bool>()).prop_map(|(int_bits, frac_bits, signed)| {
        if signed {
            FixedPointFormat::new(int_bits, frac_bits)
        } else {
            FixedPointFormat::unsigned(int_bits, frac_bits)
        }
        .expect("valid by construction")
    })
}

proptest! {
    /// Round-trip law.
    #[test]
    fn roundtrip_equals_quantize_to_float(fmt in any_format(), v in -70000.0f64..70000.0) {
        let back = decode(encode(v, fmt).unwrap(), fmt).unwrap();
        prop_assert_eq!(back, quantize_to_float(v, fmt));
    }

    /// Saturation law above the positive bound.
    #[test]
    fn saturates_above_max(fmt in any_format(), excess in 1e-9f64..1e6) {
        let v = fmt.max_value() + excess;
        prop_assert_eq!(encode(v, fmt).unwrap(), fmt.max_codeword());
    }

    /// Saturation law below the negative bound.
    #[test]
    fn saturates_below_min(fmt in signed_format(), excess in 1e-9f64..1e6) {
        let v = fmt.min_value() - excess;
        prop_assert_eq!(encode(v, fmt).unwrap(), fmt.min_codeword());
    }

    /// Idempotence of float quantization.
    #[test]
    fn quantize_to_float_is_idempotent(fmt in any_format(), v in -70000.0f64..70000.0) {
        let once = quantize_to_float(v, fmt);
        prop_assert_eq!(quantize_to_float(once, fmt), once);
    }

    /// Bitwidth coverage: quantized values never leave the representable range.
    #[test]
    fn quantized_values_stay_in_range(fmt in any_format(), v in -70000.0f64..70000.0) {
        let q = quantize_to_float(v, fmt);
        prop_assert!(q >= fmt.min_value());
        prop_assert!(q <= fmt.max_value());
    }

    /// Every codeword decodes and re-encodes to itself.
    #[test]
    fn codewords_are_fixed_points(fmt in any_format(), raw in any::<u32>()) {
        let bits = raw & fmt.mask();
        let value = decode(bits, fmt).unwrap();
        prop_assert_eq!(encode(value, fmt).unwrap(), bits);
        prop_assert_eq!(from_signed(to_signed(bits, fmt), fmt), bits);
    }

    /// Integer rescaling agrees with float banker's rounding.
    #[test]
    fn shift_matches_float_rounding(value in -1_000_000i64..1_000_000, shift in 1i32..16) {
        let expected = (value as f64 / 2f64.powi(shift)).round_ties_even() as i64;
        prop_assert_eq!(shift_round_half_even(value, shift), expected);
    }
}
