//! Fixed-point error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixedPointError {
    #[error("Invalid fixed-point format Q{int_bits}.{frac_bits}: {reason}")]
    InvalidFormat {
        int_bits: u8,
        frac_bits: u8,
        reason: &'static str,
    },

    #[error("Codeword {bits:#x} does not fit in {total_bits} bits")]
    BitsOutOfRange { bits: u32, total_bits: u8 },

    #[error("Cannot convert non-finite value {value}")]
    NonFinite { value: f64 },

    #[error("Invalid exponent range: min {min_exp} > max {max_exp}")]
    ExponentRange { min_exp: i32, max_exp: i32 },

    #[error("Exponent {exponent} does not fit in a {field_bits}-bit magnitude field")]
    ExponentField { exponent: i32, field_bits: u8 },
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
