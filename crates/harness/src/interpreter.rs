//! Bit-exact graph interpreter
//!
//! Walks the node list once, keeping every produced tensor in a name-keyed
//! environment seeded with the graph's data input. Quantized convolutions
//! recover their shift amounts from the power-of-two scale initializers
//! attached to the node; nothing else tells the interpreter how to rescale.

use std::collections::HashMap;

use tracing::{debug, trace};

use fixcnn_fixed_point::{quantize_to_float, round_half_even, FixedPointFormat};
use fixcnn_model::{
    AttributeValue, ComputationGraph, DType, GraphNode, OpType, Padding, QuantConfig, Tensor,
    TensorData, WeightsTable,
};
use fixcnn_quantize::QuantParams;

use crate::error::{HarnessError, Result};
use crate::kernels::{self, nchw, Requantize};

type Environment<'g> = HashMap<&'g str, Tensor>;

/// Widest rescaling shift a quantized convolution accepts
const MAX_SHIFT: i32 = 62;

/// Executes float, quantized or mixed graphs
pub struct Interpreter<'g> {
    graph: &'g ComputationGraph,
    weights: WeightsTable<'g>,
    config: QuantConfig,
}

impl<'g> Interpreter<'g> {
    /// Validate the graph and configuration and build the weights table
    pub fn new(graph: &'g ComputationGraph, config: QuantConfig) -> Result<Self> {
        config.validate()?;
        graph.validate()?;
        Ok(Self {
            graph,
            weights: graph.weights_table(),
            config,
        })
    }

    pub fn graph(&self) -> &'g ComputationGraph {
        self.graph
    }

    /// Run the graph and return its output
    pub fn run(&self, input: Tensor) -> Result<Tensor> {
        self.execute(input, |_, _| {})
    }

    /// Run the graph and return every node's output, in execution order
    pub fn run_traced(&self, input: Tensor) -> Result<Vec<(String, Tensor)>> {
        let mut trace = Vec::with_capacity(self.graph.nodes.len());
        self.execute(input, |node, value| {
            trace.push((node.label().to_string(), value.clone()))
        })?;
        Ok(trace)
    }

    fn execute(
        &self,
        input: Tensor,
        mut observe: impl FnMut(&GraphNode, &Tensor),
    ) -> Result<Tensor> {
        let input_name = self
            .graph
            .data_inputs()
            .next()
            .map(|info| info.name.as_str())
            .ok_or_else(|| HarnessError::InvalidInput("graph declares no data input".to_string()))?;

        let mut env: Environment<'g> = HashMap::new();
        env.insert(input_name, input);
        let mut leaky_format = None;
        let mut last = input_name;

        for node in &self.graph.nodes {
            debug!(node = node.label(), op = %node.op_type, "dispatch");
            let value = self.eval(node, &env, &mut leaky_format)?;
            trace!(
                node = node.label(),
                shape = ?value.shape(),
                dtype = %value.dtype(),
                "node output"
            );
            observe(node, &value);

            let output = node.output().ok_or_else(|| {
                HarnessError::InvalidInput(format!("node '{}' has no output", node.label()))
            })?;
            env.insert(output, value);
            last = output;
        }

        let result = self
            .graph
            .outputs
            .first()
            .map(|info| info.name.as_str())
            .unwrap_or(last);
        env.remove(result).ok_or_else(|| HarnessError::MissingValue {
            node: self.graph.name.clone(),
            name: result.to_string(),
        })
    }

    fn eval(
        &self,
        node: &'g GraphNode,
        env: &Environment<'g>,
        leaky_format: &mut Option<FixedPointFormat>,
    ) -> Result<Tensor> {
        let data = move || self.value(node, env, 0);
        match &node.op_type {
            OpType::Conv => Err(HarnessError::FloatConvolution {
                node: node.label().to_string(),
            }),
            OpType::QLinearConv => {
                let (output, weight_params) = self.qlinear_conv(node, data()?)?;
                *leaky_format = Some(self.activation_format(weight_params)?);
                Ok(output)
            }
            OpType::QuantizeLinear => self.quantize(node, data()?),
            OpType::DequantizeLinear => self.dequantize(node, data()?),
            OpType::Pad => self.pad(node, data()?),
            OpType::MaxPool => max_pool(node, data()?),
            OpType::GlobalAveragePool => global_avg_pool(data()?),
            OpType::Relu => {
                let x = data()?;
                Ok(match x.data() {
                    TensorData::Int(v) => {
                        Tensor::int(x.shape().to_vec(), x.dtype(), kernels::relu(v))?
                    }
                    TensorData::Float(v) => Tensor::float(x.shape().to_vec(), kernels::relu(v))?,
                })
            }
            OpType::LeakyRelu => {
                let slope = node
                    .attr_float("alpha")?
                    .unwrap_or(self.config.leaky_relu_slope);
                self.leaky_relu(data()?, slope, *leaky_format)
            }
            OpType::Unknown(op_type) => Err(HarnessError::UnsupportedLayer {
                node: node.label().to_string(),
                op_type: op_type.clone(),
            }),
        }
    }

    /// Data operand: an earlier value, else an initializer
    fn value<'e>(
        &'e self,
        node: &GraphNode,
        env: &'e Environment<'g>,
        index: usize,
    ) -> Result<&'e Tensor> {
        let name = self.operand(node, index)?;
        env.get(name)
            .or_else(|| self.weights.get(name))
            .ok_or_else(|| HarnessError::MissingValue {
                node: node.label().to_string(),
                name: name.to_string(),
            })
    }

    fn operand<'n>(&self, node: &'n GraphNode, index: usize) -> Result<&'n str> {
        node.input(index).ok_or_else(|| HarnessError::MissingValue {
            node: node.label().to_string(),
            name: format!("input #{}", index),
        })
    }

    fn params(&self, node: &GraphNode, scale: usize, zero_point: usize) -> Result<QuantParams> {
        Ok(QuantParams::from_initializers(
            &self.weights,
            node.label(),
            self.operand(node, scale)?,
            self.operand(node, zero_point)?,
        )?)
    }

    /// Integer dtype of a zero-point initializer, and the width values of
    /// that dtype saturate to
    fn quantized_dtype(&self, node: &GraphNode, zero_point: usize) -> Result<(DType, u8)> {
        let dtype = self
            .weights
            .require(node.label(), self.operand(node, zero_point)?)?
            .dtype();
        if !dtype.is_integer() {
            return Err(HarnessError::InvalidInput(format!(
                "zero point of node '{}' must be an integer tensor, got {}",
                node.label(),
                dtype
            )));
        }
        Ok((dtype, self.config.activation_bits.min(dtype.bits())))
    }

    /// Format negative LeakyRelu products are rounded to after a quantized
    /// convolution: the activation width with the weights' fraction bits
    fn activation_format(&self, weights: QuantParams) -> Result<FixedPointFormat> {
        let bits = self.config.activation_bits;
        let frac = (-weights.exponent()).clamp(0, bits as i32 - 1) as u8;
        Ok(FixedPointFormat::with_total_bits(bits, bits - frac)?)
    }

    fn qlinear_conv(&self, node: &GraphNode, x: &Tensor) -> Result<(Tensor, QuantParams)> {
        let label = node.label();
        let x_params = self.params(node, 1, 2)?;
        let w_params = self.params(node, 4, 5)?;
        let y_params = self.params(node, 6, 7)?;
        let (y_dtype, bits) = self.quantized_dtype(node, 7)?;

        let x_ints = int_values(node, x)?;
        let weights = self.weights.require(label, self.operand(node, 3)?)?;
        let w_ints = int_values(node, weights)?;
        let weight_shape = nchw(weights.shape())?;
        let bias = match node.input(8) {
            Some(name) => int_values(node, self.weights.require(label, name)?)?.to_vec(),
            None => vec![0; weight_shape[0]],
        };
        if let Some(kernel) = node.attr_ints("kernel_shape")? {
            let expected = [weight_shape[2] as i64, weight_shape[3] as i64];
            if kernel.as_slice() != expected {
                return Err(HarnessError::InvalidInput(format!(
                    "node '{}' declares kernel {:?} but weights are {:?}",
                    label, kernel, weight_shape
                )));
            }
        }

        let (padded, padded_shape) = kernels::pad(x_ints, nchw(x.shape())?, node.pads()?, 0);

        // Shift amounts, all from exact log2 of the scales
        let e_x = x_params.exponent();
        let frac_w = -w_params.exponent();
        let e_y = y_params.exponent();
        let m = e_x.min(0);
        let (input_shift, bias_shift, output_shift) = (e_x - m, -m, e_y + frac_w - m);
        if [input_shift, bias_shift, output_shift]
            .iter()
            .any(|shift| shift.abs() > MAX_SHIFT)
        {
            return Err(HarnessError::InvalidInput(format!(
                "node '{}' rescales by 2^{}, 2^{} and 2^{}; shifts beyond {} bits are unsupported",
                label, input_shift, bias_shift, output_shift, MAX_SHIFT
            )));
        }
        let requant = Requantize {
            input_shift: input_shift as u32,
            bias_shift: bias_shift as u32,
            output_shift,
            bits,
        };
        trace!(node = label, ?requant, "requantize");

        let (data, shape) = kernels::conv2d_int(
            &padded,
            padded_shape,
            w_ints,
            weight_shape,
            &bias,
            node.strides()?,
            requant,
        )?;
        Ok((Tensor::int(shape.to_vec(), y_dtype, data)?, w_params))
    }

    fn quantize(&self, node: &GraphNode, x: &Tensor) -> Result<Tensor> {
        let params = self.params(node, 1, 2)?;
        let (dtype, bits) = self.quantized_dtype(node, 2)?;
        let scale = params.scale();
        let values = x
            .to_f64_vec()
            .into_iter()
            .map(|v| {
                if !v.is_finite() {
                    return Err(HarnessError::InvalidInput(format!(
                        "node '{}' cannot quantize {}",
                        node.label(),
                        v
                    )));
                }
                Ok(kernels::saturate(round_half_even(v / scale) as i64, bits))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::int(x.shape().to_vec(), dtype, values)?)
    }

    fn dequantize(&self, node: &GraphNode, x: &Tensor) -> Result<Tensor> {
        let params = self.params(node, 1, 2)?;
        let values = int_values(node, x)?
            .iter()
            .map(|&v| v as f64 * params.scale())
            .collect();
        Ok(Tensor::float(x.shape().to_vec(), values)?)
    }

    fn pad(&self, node: &GraphNode, x: &Tensor) -> Result<Tensor> {
        if let Some(AttributeValue::String(mode)) = node.attribute("mode") {
            if mode != "constant" {
                return Err(HarnessError::UnsupportedLayer {
                    node: node.label().to_string(),
                    op_type: format!("Pad(mode={})", mode),
                });
            }
        }
        let padding = match node.input(1) {
            Some(name) => {
                let pads = self.weights.require(node.label(), name)?;
                Padding::from_values(int_values(node, pads)?).map_err(|reason| {
                    HarnessError::InvalidInput(format!("pads of '{}': {}", node.label(), reason))
                })?
            }
            None => node.pads()?,
        };
        let shape = nchw(x.shape())?;
        Ok(match x.data() {
            TensorData::Int(v) => {
                let (data, shape) = kernels::pad(v, shape, padding, 0);
                Tensor::int(shape.to_vec(), x.dtype(), data)?
            }
            TensorData::Float(v) => {
                let (data, shape) = kernels::pad(v, shape, padding, 0.0);
                Tensor::float(shape.to_vec(), data)?
            }
        })
    }

    fn leaky_relu(
        &self,
        x: &Tensor,
        slope: f64,
        format: Option<FixedPointFormat>,
    ) -> Result<Tensor> {
        Ok(match x.data() {
            TensorData::Int(v) => {
                Tensor::int(x.shape().to_vec(), x.dtype(), kernels::leaky_relu_int(v, slope))?
            }
            TensorData::Float(v) => {
                let data = kernels::leaky_relu(v, slope, |p| match format {
                    Some(fmt) => quantize_to_float(p, fmt),
                    None => p,
                });
                Tensor::float(x.shape().to_vec(), data)?
            }
        })
    }
}

fn int_values<'t>(node: &GraphNode, tensor: &'t Tensor) -> Result<&'t [i64]> {
    tensor.as_int().ok_or_else(|| {
        HarnessError::InvalidInput(format!(
            "node '{}' ({}) expects an integer tensor",
            node.label(),
            node.op_type
        ))
    })
}

fn max_pool(node: &GraphNode, x: &Tensor) -> Result<Tensor> {
    let kernel = node.kernel_shape()?;
    let stride = node.strides()?;
    let padding = node.pads()?;
    let shape = nchw(x.shape())?;
    Ok(match x.data() {
        TensorData::Int(v) => {
            let (padded, padded_shape) = kernels::pad(v, shape, padding, i64::MIN);
            let (data, shape) = kernels::max_pool(&padded, padded_shape, kernel, stride)?;
            Tensor::int(shape.to_vec(), x.dtype(), data)?
        }
        TensorData::Float(v) => {
            let (padded, padded_shape) = kernels::pad(v, shape, padding, f64::NEG_INFINITY);
            let (data, shape) = kernels::max_pool(&padded, padded_shape, kernel, stride)?;
            Tensor::float(shape.to_vec(), data)?
        }
    })
}

fn global_avg_pool(x: &Tensor) -> Result<Tensor> {
    let shape = nchw(x.shape())?;
    Ok(match x.data() {
        TensorData::Int(v) => {
            let (data, shape) = kernels::global_avg_pool_int(v, shape);
            Tensor::int(shape.to_vec(), x.dtype(), data)?
        }
        TensorData::Float(v) => {
            let (data, shape) = kernels::global_avg_pool(v, shape);
            Tensor::float(shape.to_vec(), data)?
        }
    })
}
