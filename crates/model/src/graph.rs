//! Computation graph
//!
//! A graph is an ordered node list (already topologically sorted), a table
//! of constant initializers and the declared external inputs and outputs.
//! Nodes refer to tensors by name only.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attributes::AttributeValue;
use crate::error::{ModelError, Result};
use crate::tensor::{DType, Tensor};
use crate::weights::WeightsTable;

/// Operation-set version assumed for graphs that do not declare one
pub const DEFAULT_OPSET_VERSION: i64 = 9;

/// Operator kinds the toolchain understands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OpType {
    Conv,
    QLinearConv,
    QuantizeLinear,
    DequantizeLinear,
    Pad,
    MaxPool,
    GlobalAveragePool,
    Relu,
    LeakyRelu,
    /// Anything else; kept so loading never fails on an unfamiliar operator
    Unknown(String),
}

impl OpType {
    pub fn as_str(&self) -> &str {
        match self {
            OpType::Conv => "Conv",
            OpType::QLinearConv => "QLinearConv",
            OpType::QuantizeLinear => "QuantizeLinear",
            OpType::DequantizeLinear => "DequantizeLinear",
            OpType::Pad => "Pad",
            OpType::MaxPool => "MaxPool",
            OpType::GlobalAveragePool => "GlobalAveragePool",
            OpType::Relu => "Relu",
            OpType::LeakyRelu => "LeakyRelu",
            OpType::Unknown(name) => name,
        }
    }
}

impl From<String> for OpType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Conv" => OpType::Conv,
            "QLinearConv" => OpType::QLinearConv,
            "QuantizeLinear" => OpType::QuantizeLinear,
            "DequantizeLinear" => OpType::DequantizeLinear,
            "Pad" => OpType::Pad,
            "MaxPool" => OpType::MaxPool,
            "GlobalAveragePool" => OpType::GlobalAveragePool,
            "Relu" => OpType::Relu,
            "LeakyRelu" => OpType::LeakyRelu,
            _ => OpType::Unknown(name),
        }
    }
}

impl From<OpType> for String {
    fn from(op: OpType) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared graph input or output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: None,
            shape: None,
        }
    }

    /// Declaration matching an initializer tensor
    pub fn for_tensor(name: impl Into<String>, tensor: &Tensor) -> Self {
        Self {
            name: name.into(),
            dtype: Some(tensor.dtype()),
            shape: Some(tensor.shape().to_vec()),
        }
    }
}

/// One operator application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub op_type: OpType,
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl GraphNode {
    pub fn new(
        op_type: OpType,
        name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            op_type,
            name: name.into(),
            inputs,
            outputs,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Stable identity used for derived tensor names: the node name, or
    /// its first output when unnamed
    pub fn label(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        self.outputs.first().map(String::as_str).unwrap_or("")
    }

    /// Input at `index`, treating an empty name as absent
    pub fn input(&self, index: usize) -> Option<&str> {
        self.inputs
            .get(index)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn output(&self) -> Option<&str> {
        self.outputs.first().map(String::as_str)
    }
}

fn default_opset() -> i64 {
    DEFAULT_OPSET_VERSION
}

/// A complete model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationGraph {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_opset")]
    pub opset_version: i64,
    #[serde(default)]
    pub inputs: Vec<ValueInfo>,
    #[serde(default)]
    pub outputs: Vec<ValueInfo>,
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub initializers: BTreeMap<String, Tensor>,
}

impl ComputationGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opset_version: DEFAULT_OPSET_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
            initializers: BTreeMap::new(),
        }
    }

    /// Check the single-writer invariant: every node input resolves to a
    /// graph input, an initializer or an earlier node output, and no name
    /// is produced twice.
    pub fn validate(&self) -> Result<()> {
        let mut defined: HashSet<&str> = self
            .inputs
            .iter()
            .map(|info| info.name.as_str())
            .chain(self.initializers.keys().map(String::as_str))
            .collect();

        for node in &self.nodes {
            for name in node.inputs.iter().filter(|name| !name.is_empty()) {
                if !defined.contains(name.as_str()) {
                    return Err(ModelError::UnresolvedInput {
                        node: node.label().to_string(),
                        name: name.clone(),
                    });
                }
            }
            for name in &node.outputs {
                if !defined.insert(name.as_str()) {
                    return Err(ModelError::DuplicateOutput {
                        node: node.label().to_string(),
                        name: name.clone(),
                    });
                }
            }
        }

        if let Some(missing) = self
            .outputs
            .iter()
            .find(|info| !defined.contains(info.name.as_str()))
        {
            return Err(ModelError::UnresolvedOutput {
                name: missing.name.clone(),
            });
        }

        debug!(
            graph = %self.name,
            nodes = self.nodes.len(),
            initializers = self.initializers.len(),
            "graph validated"
        );
        Ok(())
    }

    /// Read-only view of the initializers
    pub fn weights_table(&self) -> WeightsTable<'_> {
        WeightsTable::from_graph(self)
    }

    /// Declared inputs that are not backed by an initializer
    pub fn data_inputs(&self) -> impl Iterator<Item = &ValueInfo> {
        self.inputs
            .iter()
            .filter(|info| !self.initializers.contains_key(&info.name))
    }

    /// Whether any node produces `name`
    pub fn is_produced(&self, name: &str) -> bool {
        self.nodes
            .iter()
            .any(|node| node.outputs.iter().any(|out| out == name))
    }

    pub fn count_op(&self, op: &OpType) -> usize {
        self.nodes.iter().filter(|node| &node.op_type == op).count()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a graph from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
