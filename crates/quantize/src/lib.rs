//! fixcnn Quantization
//!
//! Turns a float CNN graph into a fixed-point one. Each convolution's
//! weights and bias are analyzed for the widest integer part they need
//! under a fixed total width, quantized, and the convolution is replaced by
//! a QuantizeLinear → QLinearConv → DequantizeLinear triple whose scales
//! are all powers of two.

mod analyzer;
mod error;
mod params;
mod rewriter;

pub use analyzer::{analyze_and_quantize, integer_width, LayerQuantization, WeightStats};
pub use error::{QuantizeError, Result};
pub use params::QuantParams;
pub use rewriter::{
    propagate_output_scale, quantize_graph, GraphRewriter, LayerReport, RewriteReport,
};
