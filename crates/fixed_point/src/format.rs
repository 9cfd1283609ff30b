//! Fixed-point format descriptor

use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};
use crate::pow2::exp2i;

/// Widest codeword supported by the codec
pub const MAX_TOTAL_BITS: u8 = 32;

/// Integer/fraction bit split of a fixed-point codeword.
///
/// A signed format is two's complement and its integer part includes the
/// sign bit, so `Q3.5` covers `[-4, 4 - 2^-5]`. The most negative codeword
/// has no positive counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFormat")]
pub struct FixedPointFormat {
    int_bits: u8,
    frac_bits: u8,
    signed: bool,
}

impl FixedPointFormat {
    /// Create a signed two's-complement format
    pub fn new(int_bits: u8, frac_bits: u8) -> Result<Self> {
        Self::build(int_bits, frac_bits, true)
    }

    /// Create an unsigned format
    pub fn unsigned(int_bits: u8, frac_bits: u8) -> Result<Self> {
        Self::build(int_bits, frac_bits, false)
    }

    /// Signed format with `int_bits` integer bits and the rest of `total_bits`
    /// as fraction bits
    pub fn with_total_bits(total_bits: u8, int_bits: u8) -> Result<Self> {
        if int_bits > total_bits {
            return Err(FixedPointError::InvalidFormat {
                int_bits,
                frac_bits: 0,
                reason: "integer bits exceed the total width",
            });
        }
        Self::new(int_bits, total_bits - int_bits)
    }

    fn build(int_bits: u8, frac_bits: u8, signed: bool) -> Result<Self> {
        let total = int_bits as u16 + frac_bits as u16;
        if total == 0 || total > MAX_TOTAL_BITS as u16 {
            return Err(FixedPointError::InvalidFormat {
                int_bits,
                frac_bits,
                reason: "total width must be within 1..=32",
            });
        }
        if signed && int_bits == 0 {
            return Err(FixedPointError::InvalidFormat {
                int_bits,
                frac_bits,
                reason: "signed formats need an integer bit for the sign",
            });
        }
        Ok(Self {
            int_bits,
            frac_bits,
            signed,
        })
    }

    pub fn int_bits(&self) -> u8 {
        self.int_bits
    }

    pub fn frac_bits(&self) -> u8 {
        self.frac_bits
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Total codeword width
    pub fn total_bits(&self) -> u8 {
        self.int_bits + self.frac_bits
    }

    /// Mask covering every bit of a codeword
    pub fn mask(&self) -> u32 {
        ((1u64 << self.total_bits()) - 1) as u32
    }

    /// Weight of the least significant bit (2^-frac_bits)
    pub fn lsb(&self) -> f64 {
        exp2i(-(self.frac_bits as i32))
    }

    /// Largest representable value
    pub fn max_value(&self) -> f64 {
        if self.signed {
            exp2i(self.int_bits as i32 - 1) - self.lsb()
        } else {
            exp2i(self.int_bits as i32) - self.lsb()
        }
    }

    /// Smallest representable value
    pub fn min_value(&self) -> f64 {
        if self.signed {
            -exp2i(self.int_bits as i32 - 1)
        } else {
            0.0
        }
    }

    /// Codeword of the largest value (all ones except the sign bit)
    pub fn max_codeword(&self) -> u32 {
        if self.signed {
            self.mask() >> 1
        } else {
            self.mask()
        }
    }

    /// Codeword of the smallest value (sign bit only, or zero when unsigned)
    pub fn min_codeword(&self) -> u32 {
        if self.signed {
            1u32 << (self.total_bits() - 1)
        } else {
            0
        }
    }
}

/// Unvalidated serde mirror of `FixedPointFormat`
#[derive(Deserialize)]
struct RawFormat {
    int_bits: u8,
    frac_bits: u8,
    #[serde(default = "default_signed")]
    signed: bool,
}

fn default_signed() -> bool {
    true
}

impl TryFrom<RawFormat> for FixedPointFormat {
    type Error = FixedPointError;

    fn try_from(raw: RawFormat) -> Result<Self> {
        Self::build(raw.int_bits, raw.frac_bits, raw.signed)
    }
}

impl std::fmt::Display for FixedPointFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = if self.signed { "Q" } else { "UQ" };
        write!(f, "{}{}.{}", prefix, self.int_bits, self.frac_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_bounds() {
        let fmt = FixedPointFormat::new(3, 5).unwrap();
        assert_eq!(fmt.total_bits(), 8);
        assert_eq!(fmt.max_value(), 4.0 - 1.0 / 32.0);
        assert_eq!(fmt.min_value(), -4.0);
        assert_eq!(fmt.max_codeword(), 0b0111_1111);
        assert_eq!(fmt.min_codeword(), 0b1000_0000);
    }

    #[test]
    fn test_unsigned_bounds() {
        let fmt = FixedPointFormat::unsigned(4, 4).unwrap();
        assert_eq!(fmt.max_value(), 16.0 - 1.0 / 16.0);
        assert_eq!(fmt.min_value(), 0.0);
        assert_eq!(fmt.max_codeword(), 0xFF);
        assert_eq!(fmt.min_codeword(), 0);
    }

    #[test]
    fn test_invalid_formats() {
        assert!(FixedPointFormat::new(0, 8).is_err());
        assert!(FixedPointFormat::new(0, 0).is_err());
        assert!(FixedPointFormat::new(20, 13).is_err());
        assert!(FixedPointFormat::unsigned(0, 8).is_ok());
        assert!(FixedPointFormat::with_total_bits(8, 9).is_err());
    }

    #[test]
    fn test_full_width_mask() {
        let fmt = FixedPointFormat::new(16, 16).unwrap();
        assert_eq!(fmt.mask(), u32::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(FixedPointFormat::new(3, 5).unwrap().to_string(), "Q3.5");
        assert_eq!(FixedPointFormat::unsigned(8, 0).unwrap().to_string(), "UQ8.0");
    }
}
