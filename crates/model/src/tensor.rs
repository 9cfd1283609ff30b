//! Dense tensors
//!
//! Float tensors hold `f64`; integer tensors hold `i64` tagged with the
//! storage dtype they must fit in (codewords are stored sign-extended).

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    I8,
    I16,
    I32,
    I64,
}

impl DType {
    pub fn is_integer(&self) -> bool {
        !matches!(self, DType::F32)
    }

    /// Storage width in bits
    pub fn bits(&self) -> u8 {
        match self {
            DType::I8 => 8,
            DType::I16 => 16,
            DType::F32 | DType::I32 => 32,
            DType::I64 => 64,
        }
    }

    /// Inclusive value range of an integer dtype
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            DType::F32 => None,
            DType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            DType::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            DType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            DType::I64 => Some((i64::MIN, i64::MAX)),
        }
    }

    /// Smallest signed integer dtype holding `bits`-wide values
    pub fn signed_for_bits(bits: u8) -> Self {
        match bits {
            0..=8 => DType::I8,
            9..=16 => DType::I16,
            17..=32 => DType::I32,
            _ => DType::I64,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
        };
        f.write_str(name)
    }
}

/// Flat element storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorData {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float(v) => v.len(),
            TensorData::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable row-major tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    data: TensorData,
}

#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    dtype: DType,
    data: TensorData,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = ModelError;

    fn try_from(raw: RawTensor) -> Result<Self> {
        match raw.data {
            TensorData::Float(values) if raw.dtype == DType::F32 => {
                Tensor::float(raw.shape, values)
            }
            TensorData::Int(values) => Tensor::int(raw.shape, raw.dtype, values),
            TensorData::Float(_) => Err(ModelError::InvalidDtype {
                expected: "f32".to_string(),
                got: raw.dtype.to_string(),
            }),
        }
    }
}

fn check_len(shape: &[usize], len: usize) -> Result<()> {
    let numel: usize = shape.iter().product();
    if numel != len {
        return Err(ModelError::InvalidShape {
            expected: shape.to_vec(),
            got: vec![len],
        });
    }
    Ok(())
}

impl Tensor {
    /// Float tensor from row-major values
    pub fn float(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        check_len(&shape, values.len())?;
        Ok(Self {
            shape,
            dtype: DType::F32,
            data: TensorData::Float(values),
        })
    }

    /// Integer tensor; every value must fit the dtype
    pub fn int(shape: Vec<usize>, dtype: DType, values: Vec<i64>) -> Result<Self> {
        check_len(&shape, values.len())?;
        let (lo, hi) = dtype.int_range().ok_or_else(|| ModelError::InvalidDtype {
            expected: "an integer dtype".to_string(),
            got: dtype.to_string(),
        })?;
        if let Some(&value) = values.iter().find(|&&v| v < lo || v > hi) {
            return Err(ModelError::ValueOutOfRange {
                value,
                dtype: dtype.to_string(),
            });
        }
        Ok(Self {
            shape,
            dtype,
            data: TensorData::Int(values),
        })
    }

    /// Rank-0 float tensor
    pub fn scalar_float(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            dtype: DType::F32,
            data: TensorData::Float(vec![value]),
        }
    }

    /// Rank-0 integer tensor
    pub fn scalar_int(dtype: DType, value: i64) -> Result<Self> {
        Self::int(Vec::new(), dtype, vec![value])
    }

    /// Float tensor of zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            dtype: DType::F32,
            data: TensorData::Float(vec![0.0; numel]),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.data, TensorData::Int(_))
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::Float(v) => Some(v),
            TensorData::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int(v) => Some(v),
            TensorData::Float(_) => None,
        }
    }

    /// Every element widened to f64
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            TensorData::Float(v) => v.clone(),
            TensorData::Int(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    /// The single element of a one-element tensor
    pub fn scalar_value(&self) -> Option<f64> {
        if self.numel() != 1 {
            return None;
        }
        match &self.data {
            TensorData::Float(v) => v.first().copied(),
            TensorData::Int(v) => v.first().map(|&x| x as f64),
        }
    }

    /// Same data under a new shape with the same element count
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Self> {
        check_len(&shape, self.numel())?;
        Ok(Self {
            shape,
            dtype: self.dtype,
            data: self.data.clone(),
        })
    }
}
