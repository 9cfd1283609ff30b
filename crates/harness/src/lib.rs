//! fixcnn Harness
//!
//! Bit-exact interpreter for float, quantized and mixed CNN graphs, plus
//! output comparison for checking a quantized graph against its float
//! reference.

mod error;
mod interpreter;
pub mod kernels;
pub mod verify;

pub use error::{HarnessError, Result};
pub use interpreter::Interpreter;
pub use verify::{compare_outputs, ensure_within, Comparison};
