//! Harness error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Model error: {0}")]
    Model(#[from] fixcnn_model::ModelError),

    #[error("Quantization error: {0}")]
    Quantize(#[from] fixcnn_quantize::QuantizeError),

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] fixcnn_fixed_point::FixedPointError),

    #[error("Unsupported layer '{node}' of type {op_type}")]
    UnsupportedLayer { node: String, op_type: String },

    #[error("Float convolution '{node}' cannot be executed; quantize the graph first")]
    FloatConvolution { node: String },

    #[error("Node '{node}' reads '{name}', which has no value yet")]
    MissingValue { node: String, name: String },

    #[error("Verification failed: {message}")]
    VerificationFailed { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
