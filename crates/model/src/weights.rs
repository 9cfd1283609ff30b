//! Initializer lookup

use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::graph::ComputationGraph;
use crate::tensor::Tensor;

/// Read-only name → tensor view over a graph's initializers.
///
/// Built once per pass; lookups that a node depends on go through
/// [`WeightsTable::require`] so a missing constant names the node.
#[derive(Debug, Clone)]
pub struct WeightsTable<'g> {
    tensors: HashMap<&'g str, &'g Tensor>,
}

impl<'g> WeightsTable<'g> {
    pub fn from_graph(graph: &'g ComputationGraph) -> Self {
        let tensors = graph
            .initializers
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor))
            .collect();
        Self { tensors }
    }

    pub fn get(&self, name: &str) -> Option<&'g Tensor> {
        self.tensors.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Initializer that `node` cannot run without
    pub fn require(&self, node: &str, name: &str) -> Result<&'g Tensor> {
        self.get(name).ok_or_else(|| ModelError::MissingInitializer {
            node: node.to_string(),
            name: name.to_string(),
        })
    }

    /// Single value of a one-element initializer
    pub fn scalar(&self, node: &str, name: &str) -> Result<f64> {
        let tensor = self.require(node, name)?;
        tensor.scalar_value().ok_or_else(|| ModelError::InvalidShape {
            expected: vec![],
            got: tensor.shape().to_vec(),
        })
    }
}
