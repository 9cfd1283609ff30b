//! fixcnn Model
//!
//! In-memory computation graph for small CNNs: named nodes, constant
//! initializers and declared inputs, plus the quantization configuration
//! shared by the rewriter and the interpreter. Graphs persist as JSON.

mod attributes;
mod config;
mod error;
mod graph;
mod tensor;
mod weights;

pub use attributes::{AttributeValue, Padding};
pub use config::QuantConfig;
pub use error::{ModelError, Result};
pub use graph::{ComputationGraph, GraphNode, OpType, ValueInfo, DEFAULT_OPSET_VERSION};
pub use tensor::{DType, Tensor, TensorData};
pub use weights::WeightsTable;
