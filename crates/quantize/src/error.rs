//! Quantization error types

use fixcnn_fixed_point::FixedPointError;
use fixcnn_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuantizeError {
    #[error("Invalid quantization parameters (scale {scale}, zero point {zero_point}): {reason}")]
    InvalidQuantParams {
        scale: f64,
        zero_point: i64,
        reason: &'static str,
    },

    #[error("Node '{node}' references missing initializer '{name}'")]
    MissingInitializer { node: String, name: String },

    #[error("Malformed node '{node}': {reason}")]
    MalformedNode { node: String, reason: String },

    #[error("Output scale {scale} of node '{node}' is not a power of two after clamping")]
    ScaleOutOfRange { node: String, scale: f64 },

    #[error("Tensor '{name}' of node '{node}' contains NaN or infinite values")]
    NonFiniteTensor { node: String, name: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] FixedPointError),
}

pub type Result<T> = std::result::Result<T, QuantizeError>;
