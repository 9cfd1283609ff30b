//! fixcnn Fixed-Point Codec
//!
//! Two's-complement fixed-point encoding for CNN weights and activations.
//! Every conversion rounds half-to-even and saturates at the format bounds,
//! matching the rounding unit of the target hardware.

mod error;
mod fixed;
mod format;
mod pow2;
mod vector;

pub use error::{FixedPointError, Result};
pub use fixed::{
    decode, encode, format_bits, from_signed, quantize_to_float, round_half_even,
    shift_round_half_even, to_signed,
};
pub use format::{FixedPointFormat, MAX_TOTAL_BITS};
pub use pow2::{exact_log2, is_power_of_two, power_of_two_exponent, Pow2Code, POW2_FIELD_BITS};
pub use vector::{random_fixed_vector, random_format, FixedVector};
