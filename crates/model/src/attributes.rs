//! Node attribute decoding
//!
//! Attributes follow the ONNX conventions for the operators the graph
//! recognizes: `kernel_shape`, `strides`, `pads` and `alpha`.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::graph::GraphNode;

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    String(String),
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Ints(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

/// Spatial zero padding of an NCHW tensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Padding {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Padding {
    pub fn is_zero(&self) -> bool {
        *self == Padding::default()
    }

    /// Decode ONNX pad values.
    ///
    /// Four values are `[top, left, bottom, right]`. Eight values follow the
    /// `Pad` operator layout over NCHW (begins then ends) and must leave the
    /// batch and channel axes unpadded.
    pub fn from_values(values: &[i64]) -> std::result::Result<Self, String> {
        if values.iter().any(|&v| v < 0) {
            return Err("negative padding".to_string());
        }
        let v: Vec<usize> = values.iter().map(|&x| x as usize).collect();
        match v.as_slice() {
            &[top, left, bottom, right] | &[0, 0, top, left, 0, 0, bottom, right] => Ok(Padding {
                top,
                left,
                bottom,
                right,
            }),
            &[_, _, _, _, _, _, _, _] => Err("batch and channel axes cannot be padded".to_string()),
            _ => Err(format!("expected 4 or 8 values, got {}", v.len())),
        }
    }
}

impl GraphNode {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    fn invalid(&self, name: &str, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidAttribute {
            node: self.label().to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Integer attribute, if present
    pub fn attr_int(&self, name: &str) -> Result<Option<i64>> {
        match self.attribute(name) {
            None => Ok(None),
            Some(AttributeValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(self.invalid(name, format!("expected an int, got {:?}", other))),
        }
    }

    /// Integer list attribute, if present
    pub fn attr_ints(&self, name: &str) -> Result<Option<Vec<i64>>> {
        match self.attribute(name) {
            None => Ok(None),
            Some(AttributeValue::Ints(v)) => Ok(Some(v.clone())),
            Some(AttributeValue::Int(v)) => Ok(Some(vec![*v])),
            Some(other) => Err(self.invalid(name, format!("expected ints, got {:?}", other))),
        }
    }

    /// Float attribute, if present (integer values are widened)
    pub fn attr_float(&self, name: &str) -> Result<Option<f64>> {
        match self.attribute(name) {
            None => Ok(None),
            Some(AttributeValue::Float(v)) => Ok(Some(*v)),
            Some(AttributeValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(self.invalid(name, format!("expected a float, got {:?}", other))),
        }
    }

    fn attr_pair(&self, name: &str) -> Result<Option<[usize; 2]>> {
        let Some(values) = self.attr_ints(name)? else {
            return Ok(None);
        };
        match values.as_slice() {
            &[h, w] if h > 0 && w > 0 => Ok(Some([h as usize, w as usize])),
            &[k] if k > 0 => Ok(Some([k as usize, k as usize])),
            _ => Err(self.invalid(name, format!("expected two positive values, got {:?}", values))),
        }
    }

    /// `kernel_shape` as `[height, width]`
    pub fn kernel_shape(&self) -> Result<[usize; 2]> {
        self.attr_pair("kernel_shape")?
            .ok_or_else(|| ModelError::MissingAttribute {
                node: self.label().to_string(),
                name: "kernel_shape".to_string(),
            })
    }

    /// `strides` as `[height, width]`, defaulting to 1
    pub fn strides(&self) -> Result<[usize; 2]> {
        Ok(self.attr_pair("strides")?.unwrap_or([1, 1]))
    }

    /// Spatial padding from the `pads` attribute, zero when absent
    pub fn pads(&self) -> Result<Padding> {
        match self.attr_ints("pads")? {
            None => Ok(Padding::default()),
            Some(values) => {
                Padding::from_values(&values).map_err(|reason| self.invalid("pads", reason))
            }
        }
    }
}
