//! Model error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node '{node}' references missing initializer '{name}'")]
    MissingInitializer { node: String, name: String },

    #[error("Node '{node}' reads '{name}', which is neither a graph input, an initializer nor an earlier output")]
    UnresolvedInput { node: String, name: String },

    #[error("Graph output '{name}' is never produced")]
    UnresolvedOutput { name: String },

    #[error("Node '{node}' writes '{name}', which is already defined")]
    DuplicateOutput { node: String, name: String },

    #[error("Node '{node}' is missing attribute '{name}'")]
    MissingAttribute { node: String, name: String },

    #[error("Node '{node}' has invalid attribute '{name}': {reason}")]
    InvalidAttribute {
        node: String,
        name: String,
        reason: String,
    },

    #[error("Invalid tensor shape: expected {expected:?}, got {got:?}")]
    InvalidShape { expected: Vec<usize>, got: Vec<usize> },

    #[error("Invalid tensor dtype: expected {expected}, got {got}")]
    InvalidDtype { expected: String, got: String },

    #[error("Value {value} does not fit in {dtype}")]
    ValueOutOfRange { value: i64, dtype: String },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
