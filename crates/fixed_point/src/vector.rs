//! Fixed-point vectors

use rand::Rng;

use crate::error::{FixedPointError, Result};
use crate::fixed::{encode, to_signed};
use crate::format::{FixedPointFormat, MAX_TOTAL_BITS};

/// Codewords sharing a single fixed-point format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedVector {
    /// Raw codewords, each within `format.mask()`
    pub data: Vec<u32>,
    /// Common format of every element
    pub format: FixedPointFormat,
}

impl FixedVector {
    /// Create from raw codewords, rejecting any that overflow the format
    pub fn from_raw(data: Vec<u32>, format: FixedPointFormat) -> Result<Self> {
        if let Some(&bits) = data.iter().find(|&&bits| bits & !format.mask() != 0) {
            return Err(FixedPointError::BitsOutOfRange {
                bits,
                total_bits: format.total_bits(),
            });
        }
        Ok(Self { data, format })
    }

    /// Encode a slice of floats
    pub fn from_f64_slice(values: &[f64], format: FixedPointFormat) -> Result<Self> {
        let data = values
            .iter()
            .map(|&v| encode(v, format))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { data, format })
    }

    /// Decode every element
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let lsb = self.format.lsb();
        self.data
            .iter()
            .map(|&bits| to_signed(bits, self.format) as f64 * lsb)
            .collect()
    }

    /// Sign-extended integer value of every element
    pub fn to_signed_vec(&self) -> Vec<i64> {
        self.data
            .iter()
            .map(|&bits| to_signed(bits, self.format))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Codeword at index
    pub fn get(&self, index: usize) -> Option<u32> {
        self.data.get(index).copied()
    }

    /// All-zero vector
    pub fn zeros(len: usize, format: FixedPointFormat) -> Self {
        Self {
            data: vec![0; len],
            format,
        }
    }
}

/// Uniformly random codewords of the given format
pub fn random_fixed_vector<R: Rng + ?Sized>(
    len: usize,
    format: FixedPointFormat,
    rng: &mut R,
) -> FixedVector {
    let data = (0..len)
        .map(|_| rng.gen_range(0..=format.mask()))
        .collect();
    FixedVector { data, format }
}

/// Random signed format of at most `max_bits` total bits
pub fn random_format<R: Rng + ?Sized>(max_bits: u8, rng: &mut R) -> Result<FixedPointFormat> {
    let max_bits = max_bits.clamp(1, MAX_TOTAL_BITS);
    let total = rng.gen_range(1..=max_bits);
    let int_bits = rng.gen_range(1..=total);
    FixedPointFormat::new(int_bits, total - int_bits)
}
