use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::Result;
use crate::graph::GraphContainer;
use crate::model::TensorId;

/// One allocator call of a memory schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    Allocate { tensor: TensorId, bytes: usize },
    Release { tensor: TensorId, bytes: usize },
}

/// Memory allocation plan for a tensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorAllocation {
    /// Tensor ID
    pub tensor_id: TensorId,
    /// Offset in the arena
    pub offset: usize,
    /// Requested size in bytes, before alignment
    pub size_bytes: usize,
}

/// Result of binding a graph's tensors into its arena
#[derive(Debug, Clone, Serialize)]
pub struct MemoryPlan {
    /// Tensor allocations, ordered by offset
    pub allocations: Vec<TensorAllocation>,
    /// Bytes still reserved when planning finished
    pub used_bytes: usize,
    /// Size of the materialized arena
    pub peak_bytes: usize,
    pub alignment: usize,
}

impl MemoryPlan {
    pub fn allocation(&self, tensor_id: TensorId) -> Option<&TensorAllocation> {
        self.allocations.iter().find(|a| a.tensor_id == tensor_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Decides the order of allocator calls for a graph's tensors
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPlanner {
    reuse_intermediate_buffers: bool,
}

impl MemoryPlanner {
    pub fn new(reuse_intermediate_buffers: bool) -> Self {
        Self {
            reuse_intermediate_buffers,
        }
    }

    /// Allocation schedule for every tensor of a sorted graph.
    ///
    /// Without reuse, each tensor is allocated once in container order and
    /// nothing is released. With reuse, produced tensors are released right
    /// after their last consumer runs.
    pub fn schedule(&self, graph: &GraphContainer) -> Vec<PlanStep> {
        if !self.reuse_intermediate_buffers {
            return graph
                .tensors()
                .map(|t| PlanStep::Allocate {
                    tensor: t.id(),
                    bytes: t.size_in_bytes(),
                })
                .collect();
        }

        let last_use = self.compute_tensor_lifetimes(graph);
        let mut steps = Vec::new();

        // Graph inputs and constants live for the whole run
        for tensor in graph.tensors().filter(|t| t.source().is_none()) {
            steps.push(PlanStep::Allocate {
                tensor: tensor.id(),
                bytes: tensor.size_in_bytes(),
            });
        }

        for (index, op) in graph.operators().enumerate() {
            for &output in op.outputs() {
                if let Some(tensor) = graph.tensor(output) {
                    steps.push(PlanStep::Allocate {
                        tensor: output,
                        bytes: tensor.size_in_bytes(),
                    });
                }
            }

            let mut released = HashSet::new();
            for &input in op.inputs() {
                let Some(tensor) = graph.tensor(input) else { continue };
                if tensor.source().is_none() || !released.insert(input) {
                    continue;
                }
                if last_use.get(&input) == Some(&index) {
                    steps.push(PlanStep::Release {
                        tensor: input,
                        bytes: tensor.size_in_bytes(),
                    });
                }
            }
        }

        steps
    }

    /// Position (in operator order) of the last consumer of each consumed tensor
    pub fn compute_tensor_lifetimes(&self, graph: &GraphContainer) -> HashMap<TensorId, usize> {
        let mut last_use = HashMap::new();
        for (index, op) in graph.operators().enumerate() {
            for &input in op.inputs() {
                last_use.insert(input, index);
            }
        }
        last_use
    }
}
