//! Float → fixed-point graph rewriting
//!
//! Every `Conv` node becomes
//!
//! ```text
//! QuantizeLinear  {in}_quant      (omitted when {in} is already quantized)
//! QLinearConv     {label}_qconv   -> {label}_dequant
//! DequantizeLinear {label}_dequant -> original conv output
//! ```
//!
//! The rewrite runs in two phases: all layers are analyzed in parallel
//! against the untouched input graph, then nodes are spliced serially
//! because the output scale of each layer feeds the next.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use fixcnn_fixed_point::{is_power_of_two, round_half_even, FixedPointFormat};
use fixcnn_model::{
    ComputationGraph, DType, GraphNode, OpType, QuantConfig, Tensor, ValueInfo, WeightsTable,
};

use crate::analyzer::{analyze_and_quantize, LayerQuantization, WeightStats};
use crate::error::{QuantizeError, Result};
use crate::params::QuantParams;

/// Summary of one rewritten convolution
#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub node: String,
    pub weight_format: FixedPointFormat,
    pub input: QuantParams,
    pub output: QuantParams,
    pub stats: WeightStats,
}

/// Result of a rewrite
#[derive(Debug, Clone)]
pub struct RewriteReport {
    pub graph: ComputationGraph,
    pub layers: Vec<LayerReport>,
    /// Number of QuantizeLinear nodes inserted
    pub quantize_nodes: usize,
}

/// Output scale of a quantized convolution.
///
/// `input_scale / 2^round(log2(mean_abs_weight))`, clamped to
/// `[1, 2^total_bits]`. A zero mean leaves the scale unchanged before the
/// clamp.
pub fn propagate_output_scale(
    node: &str,
    input: QuantParams,
    mean_abs_weight: f64,
    total_bits: u8,
) -> Result<QuantParams> {
    let factor = if mean_abs_weight > 0.0 {
        round_half_even(mean_abs_weight.log2()) as i32
    } else {
        0
    };
    let raw = 2f64.powi(input.exponent() - factor);
    let scale = raw.clamp(1.0, 2f64.powi(total_bits as i32));
    if !is_power_of_two(scale) {
        return Err(QuantizeError::ScaleOutOfRange {
            node: node.to_string(),
            scale,
        });
    }
    QuantParams::new(scale, 0)
}

/// Conv node with its analyzed weights
struct AnalyzedConv<'g> {
    node: &'g GraphNode,
    input: &'g str,
    weight_name: &'g str,
    bias_name: &'g str,
    layer: LayerQuantization,
}

fn conv_operands(node: &GraphNode) -> Result<(&str, &str, &str)> {
    let malformed = |reason: &str| QuantizeError::MalformedNode {
        node: node.label().to_string(),
        reason: reason.to_string(),
    };
    let input = node.input(0).ok_or_else(|| malformed("missing data input"))?;
    let weights = node.input(1).ok_or_else(|| malformed("missing weight input"))?;
    let bias = node.input(2).ok_or_else(|| malformed("missing bias input"))?;
    if node.output().is_none() {
        return Err(malformed("missing output"));
    }
    Ok((input, weights, bias))
}

fn analyze_conv<'g>(
    node: &'g GraphNode,
    table: &WeightsTable<'g>,
    total_bits: u8,
) -> Result<AnalyzedConv<'g>> {
    let label = node.label();
    let (input, weight_name, bias_name) = conv_operands(node)?;
    let lookup = |name: &str| {
        table
            .get(name)
            .ok_or_else(|| QuantizeError::MissingInitializer {
                node: label.to_string(),
                name: name.to_string(),
            })
    };
    let weights = lookup(weight_name)?;
    let bias = lookup(bias_name)?;
    let layer = analyze_and_quantize(label, weights, bias, total_bits)?;
    Ok(AnalyzedConv {
        node,
        input,
        weight_name,
        bias_name,
        layer,
    })
}

/// A quantized activation a QLinearConv can read
#[derive(Debug, Clone)]
struct QuantizedTensor {
    output: String,
    scale: String,
    zero_point: String,
    params: QuantParams,
}

impl QuantizedTensor {
    fn derived(quant_name: String, params: QuantParams) -> Self {
        Self {
            scale: format!("{}_scale", quant_name),
            zero_point: format!("{}_zero_point", quant_name),
            output: quant_name,
            params,
        }
    }

    /// Parameters of a QuantizeLinear already present in the input graph
    fn existing(node: &GraphNode, table: &WeightsTable<'_>) -> Result<Option<(String, Self)>> {
        let (Some(input), Some(output), Some(scale), Some(zero_point)) =
            (node.input(0), node.output(), node.input(1), node.input(2))
        else {
            return Ok(None);
        };
        let params = QuantParams::from_initializers(table, node.label(), scale, zero_point)?;
        Ok(Some((
            input.to_string(),
            Self {
                output: output.to_string(),
                scale: scale.to_string(),
                zero_point: zero_point.to_string(),
                params,
            },
        )))
    }
}

/// Accumulates the new node list and initializers during the splice
struct Splice {
    nodes: Vec<GraphNode>,
    initializers: Vec<(String, Tensor)>,
    /// Initializer names of the input graph
    reserved: HashSet<String>,
    /// Derived initializer name -> index into `initializers`
    emitted: HashMap<String, usize>,
}

impl Splice {
    /// Register a derived initializer. Re-emitting a name with an identical
    /// tensor is a no-op, which happens when an unnamed convolution's output
    /// scale and the next layer's input scale share a name.
    fn add_initializer(&mut self, node: &str, name: String, tensor: Tensor) -> Result<()> {
        let conflict = match self.emitted.get(&name) {
            Some(&index) => self.initializers[index].1 != tensor,
            None => self.reserved.contains(&name),
        };
        if conflict {
            return Err(QuantizeError::MalformedNode {
                node: node.to_string(),
                reason: format!("derived tensor name '{}' is already in use", name),
            });
        }
        if !self.emitted.contains_key(&name) {
            self.emitted.insert(name.clone(), self.initializers.len());
            self.initializers.push((name, tensor));
        }
        Ok(())
    }

    fn add_params(
        &mut self,
        node: &str,
        prefix: &str,
        params: QuantParams,
        zero_point_dtype: DType,
    ) -> Result<()> {
        let (scale, zero_point) = params.to_tensors(zero_point_dtype)?;
        self.add_initializer(node, format!("{}_scale", prefix), scale)?;
        self.add_initializer(node, format!("{}_zero_point", prefix), zero_point)
    }
}

/// Rewrites float convolutions into quantized ones
#[derive(Debug, Clone)]
pub struct GraphRewriter {
    config: QuantConfig,
}

impl GraphRewriter {
    pub fn new(config: QuantConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &QuantConfig {
        &self.config
    }

    /// Produce the quantized version of `graph`; the input is not modified
    pub fn rewrite(&self, graph: &ComputationGraph) -> Result<RewriteReport> {
        let weight_bits = self.config.weight_bits;
        let weight_dtype = DType::signed_for_bits(weight_bits);
        let activation_dtype = DType::signed_for_bits(self.config.activation_bits);
        let table = graph.weights_table();

        // Phase 1: analysis, read-only over the input graph
        let mut analyzed: HashMap<usize, AnalyzedConv<'_>> = graph
            .nodes
            .par_iter()
            .enumerate()
            .filter(|(_, node)| node.op_type == OpType::Conv)
            .map(|(index, node)| Ok((index, analyze_conv(node, &table, weight_bits)?)))
            .collect::<Result<_>>()?;

        // Phase 2: serial splice
        let mut splice = Splice {
            nodes: Vec::with_capacity(graph.nodes.len() + 2 * analyzed.len()),
            initializers: Vec::new(),
            reserved: graph.initializers.keys().cloned().collect(),
            emitted: HashMap::new(),
        };
        let mut quantized: HashMap<String, QuantizedTensor> = HashMap::new();
        let mut superseded: HashSet<&str> = HashSet::new();
        let mut layers = Vec::with_capacity(analyzed.len());
        let mut quantize_nodes = 0;
        let mut propagated = QuantParams::new(self.config.input_scale, 0)?;

        for (index, node) in graph.nodes.iter().enumerate() {
            let Some(conv) = analyzed.remove(&index) else {
                if node.op_type == OpType::QuantizeLinear {
                    if let Some((input, existing)) = QuantizedTensor::existing(node, &table)? {
                        debug!(node = node.label(), input = %input, "existing quantizer");
                        quantized.entry(input).or_insert(existing);
                    }
                }
                splice.nodes.push(node.clone());
                continue;
            };
            let label = node.label();

            let source = match quantized.get(conv.input) {
                Some(source) => {
                    debug!(node = label, input = conv.input, "input already quantized");
                    source.clone()
                }
                None => {
                    let source =
                        QuantizedTensor::derived(format!("{}_quant", conv.input), propagated);
                    splice.nodes.push(GraphNode::new(
                        OpType::QuantizeLinear,
                        source.output.clone(),
                        vec![
                            conv.input.to_string(),
                            source.scale.clone(),
                            source.zero_point.clone(),
                        ],
                        vec![source.output.clone()],
                    ));
                    splice.add_params(label, &source.output, source.params, activation_dtype)?;
                    quantized.insert(conv.input.to_string(), source.clone());
                    quantize_nodes += 1;
                    source
                }
            };
            let input_params = source.params;

            let output_params = propagate_output_scale(
                label,
                input_params,
                conv.layer.stats.mean_abs_value,
                weight_bits,
            )?;

            let dequant_name = format!("{}_dequant", label);
            let mut qconv = GraphNode::new(
                OpType::QLinearConv,
                format!("{}_qconv", label),
                vec![
                    source.output,
                    source.scale,
                    source.zero_point,
                    format!("{}_quant_weights", label),
                    format!("{}_quant_weights_scale", label),
                    format!("{}_quant_weights_zero_point", label),
                    format!("{}_quant_scale", label),
                    format!("{}_quant_zero_point", label),
                    format!("{}_quant_bias", label),
                ],
                vec![dequant_name.clone()],
            );
            qconv.attributes = conv.node.attributes.clone();
            splice.nodes.push(qconv);

            let original_output = conv.node.outputs[0].clone();
            splice.nodes.push(GraphNode::new(
                OpType::DequantizeLinear,
                dequant_name.clone(),
                vec![
                    dequant_name.clone(),
                    format!("{}_scale", dequant_name),
                    format!("{}_zero_point", dequant_name),
                ],
                vec![original_output],
            ));

            let weight_params = conv.layer.params();
            splice.add_initializer(
                label,
                format!("{}_quant_weights", label),
                conv.layer.weights,
            )?;
            splice.add_params(
                label,
                &format!("{}_quant_weights", label),
                weight_params,
                weight_dtype,
            )?;
            splice.add_params(
                label,
                &format!("{}_quant", label),
                output_params,
                activation_dtype,
            )?;
            splice.add_initializer(label, format!("{}_quant_bias", label), conv.layer.bias)?;
            splice.add_params(label, &dequant_name, output_params, activation_dtype)?;

            superseded.insert(conv.weight_name);
            superseded.insert(conv.bias_name);

            info!(
                node = label,
                weights = %conv.layer.format,
                input_scale = %input_params,
                output_scale = %output_params,
                "quantized convolution"
            );
            layers.push(LayerReport {
                node: label.to_string(),
                weight_format: conv.layer.format,
                input: input_params,
                output: output_params,
                stats: conv.layer.stats,
            });
            propagated = output_params;
        }

        let mut initializers: BTreeMap<String, Tensor> = graph
            .initializers
            .iter()
            .filter(|(name, _)| !superseded.contains(name.as_str()))
            .map(|(name, tensor)| (name.clone(), tensor.clone()))
            .collect();
        let mut inputs: Vec<ValueInfo> = graph
            .inputs
            .iter()
            .filter(|info| !superseded.contains(info.name.as_str()))
            .cloned()
            .collect();
        for (name, tensor) in splice.initializers {
            inputs.push(ValueInfo::for_tensor(name.clone(), &tensor));
            initializers.insert(name, tensor);
        }

        let rewritten = ComputationGraph {
            name: graph.name.clone(),
            opset_version: self.config.quantized_opset,
            inputs,
            outputs: graph.outputs.clone(),
            nodes: splice.nodes,
            initializers,
        };
        rewritten.validate()?;

        info!(
            graph = %rewritten.name,
            convolutions = layers.len(),
            quantize_nodes,
            opset = rewritten.opset_version,
            "graph quantized"
        );
        Ok(RewriteReport {
            graph: rewritten,
            layers,
            quantize_nodes,
        })
    }
}

/// Rewrite with the given configuration, discarding the per-layer report
pub fn quantize_graph(graph: &ComputationGraph, config: QuantConfig) -> Result<ComputationGraph> {
    Ok(GraphRewriter::new(config)?.rewrite(graph)?.graph)
}
