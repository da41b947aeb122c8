use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::memory::allocator::MemoryAllocator;
use crate::model::{DataType, OpId, OperatorNode, Shape, TensorId, TensorNode};
use crate::ops::OpKind;
use crate::optimization::graph_optimizer::{GraphOptimizer, OptimizationStats};
use crate::runtime::Runtime;

/// Owner of every tensor and operator of a graph.
///
/// Nodes refer to each other by identity only. All edge updates go through the
/// container so that producer/consumer links on tensors and the derived
/// predecessor/successor sets on operators always agree.
#[derive(Debug)]
pub struct GraphContainer {
    runtime: Runtime,
    pub(super) tensors: HashMap<TensorId, TensorNode>,
    pub(super) tensor_order: Vec<TensorId>,
    pub(super) operators: HashMap<OpId, OperatorNode>,
    pub(super) op_order: Vec<OpId>,
    pub(super) sorted: bool,
    pub(super) allocator: MemoryAllocator,
}

impl GraphContainer {
    pub fn new(runtime: Runtime) -> Result<Self> {
        let allocator = MemoryAllocator::new(runtime.provider(), runtime.options().alignment)?;
        Ok(Self {
            runtime,
            tensors: HashMap::new(),
            tensor_order: Vec::new(),
            operators: HashMap::new(),
            op_order: Vec::new(),
            sorted: false,
            allocator,
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Create a tensor under this graph's runtime
    pub fn add_tensor(&mut self, shape: Shape, data_type: DataType) -> TensorId {
        let tensor = TensorNode::new(shape, data_type, &self.runtime);
        let id = tensor.id();
        self.tensor_order.push(id);
        self.tensors.insert(id, tensor);
        id
    }

    /// Take ownership of a tensor built outside the graph.
    ///
    /// Any links it carried are dropped; the tensor must come from this
    /// graph's runtime and must not already be present.
    pub fn insert_tensor(&mut self, mut tensor: TensorNode) -> Result<TensorId> {
        if !tensor.runtime().same_as(&self.runtime) {
            return Err(Error::RuntimeMismatch {
                expected: self.runtime.to_string(),
                found: tensor.runtime().to_string(),
            });
        }
        let id = tensor.id();
        if self.tensors.contains_key(&id) {
            return Err(Error::DuplicateTensor(id));
        }

        tensor.detach();
        self.tensor_order.push(id);
        self.tensors.insert(id, tensor);
        Ok(id)
    }

    /// Add an operator and link it to the producers and consumers of its tensors
    pub fn register(&mut self, op: OperatorNode) -> Result<OpId> {
        let id = op.id();
        if self.operators.contains_key(&id) {
            return Err(Error::InvalidGraph(format!("operator {} is already registered", id)));
        }
        for &tensor in op.inputs().iter().chain(op.outputs()) {
            if !self.tensors.contains_key(&tensor) {
                return Err(Error::UnknownTensor(tensor));
            }
        }
        for (i, output) in op.outputs().iter().enumerate() {
            if op.outputs()[..i].contains(output) {
                return Err(Error::InvalidGraph(format!("{} lists output {} twice", id, output)));
            }
            if let Some(source) = self.tensors[output].source() {
                return Err(Error::InvalidGraph(format!(
                    "tensor {} is already produced by {}",
                    output, source
                )));
            }
        }

        let inputs = op.inputs().to_vec();
        let outputs = op.outputs().to_vec();
        log::debug!("registering {} {}", id, op);
        self.operators.insert(id, op);
        self.op_order.push(id);
        self.sorted = false;

        for input in inputs {
            let source = match self.tensors.get_mut(&input) {
                Some(tensor) => {
                    tensor.add_target(id);
                    tensor.source()
                }
                None => None,
            };
            if let Some(source) = source {
                self.link(source, id);
            }
        }
        for output in outputs {
            let targets = match self.tensors.get_mut(&output) {
                Some(tensor) => {
                    tensor.set_source(Some(id));
                    tensor.targets().to_vec()
                }
                None => Vec::new(),
            };
            for target in targets {
                self.link(id, target);
            }
        }

        Ok(id)
    }

    /// Run the rewrite passes selected by the runtime's optimization level
    pub fn optimize(&mut self) -> OptimizationStats {
        let level = self.runtime.options().optimization_level;
        GraphOptimizer::for_level(level).optimize(self)
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorNode> {
        self.tensors.get(&id)
    }

    pub fn operator(&self, id: OpId) -> Option<&OperatorNode> {
        self.operators.get(&id)
    }

    /// Tensors in container order
    pub fn tensors(&self) -> impl Iterator<Item = &TensorNode> + '_ {
        self.tensor_order.iter().filter_map(move |id| self.tensors.get(id))
    }

    /// Operators in container order; topological once `topological_sort` succeeded
    pub fn operators(&self) -> impl Iterator<Item = &OperatorNode> + '_ {
        self.op_order.iter().filter_map(move |id| self.operators.get(id))
    }

    pub fn tensor_ids(&self) -> &[TensorId] {
        &self.tensor_order
    }

    pub fn operator_ids(&self) -> &[OpId] {
        &self.op_order
    }

    pub fn contains_tensor(&self, id: TensorId) -> bool {
        self.tensors.contains_key(&id)
    }

    pub fn contains_operator(&self, id: OpId) -> bool {
        self.operators.contains_key(&id)
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    /// `index`-th output of an operator
    pub fn output(&self, op: OpId, index: usize) -> Option<TensorId> {
        self.operators.get(&op).and_then(|op| op.outputs().get(index).copied())
    }

    /// Producer of a tensor
    pub fn producer(&self, tensor: TensorId) -> Option<&OperatorNode> {
        self.tensors
            .get(&tensor)
            .and_then(|t| t.source())
            .and_then(|op| self.operators.get(&op))
    }

    /// Mutable access to an operator's attributes; edges are not affected
    pub fn operator_kind_mut(&mut self, op: OpId) -> Option<&mut OpKind> {
        self.operators.get_mut(&op).map(|op| op.kind_mut())
    }

    fn link(&mut self, pred: OpId, succ: OpId) {
        if let Some(op) = self.operators.get_mut(&pred) {
            op.add_successor(succ);
        }
        if let Some(op) = self.operators.get_mut(&succ) {
            op.add_predecessor(pred);
        }
    }

    /// Drop the `pred -> succ` edge unless another tensor still connects them
    fn unlink_if_unused(&mut self, pred: OpId, succ: OpId) {
        let still_linked = self.operators.get(&succ).map_or(false, |op| {
            op.inputs()
                .iter()
                .any(|t| self.tensors.get(t).and_then(|t| t.source()) == Some(pred))
        });
        if still_linked {
            return;
        }
        if let Some(op) = self.operators.get_mut(&pred) {
            op.remove_successor(succ);
        }
        if let Some(op) = self.operators.get_mut(&succ) {
            op.remove_predecessor(pred);
        }
    }

    /// Point input `slot` of `op` at `tensor`, moving every affected edge
    pub fn replace_input_at(&mut self, op: OpId, slot: usize, tensor: TensorId) -> Result<()> {
        let node = self.operators.get(&op).ok_or(Error::UnknownOperator(op))?;
        let old = *node.inputs().get(slot).ok_or_else(|| {
            Error::ValidationError(format!("{} has no input slot {}", op, slot))
        })?;
        if !self.tensors.contains_key(&tensor) {
            return Err(Error::UnknownTensor(tensor));
        }
        if old == tensor {
            return Ok(());
        }

        let still_consumed = match self.operators.get_mut(&op) {
            Some(node) => {
                node.set_input(slot, tensor);
                node.inputs().contains(&old)
            }
            None => false,
        };

        let old_source = match self.tensors.get_mut(&old) {
            Some(old_tensor) => {
                if !still_consumed {
                    old_tensor.remove_target(op);
                }
                old_tensor.source()
            }
            None => None,
        };
        if let Some(source) = old_source {
            self.unlink_if_unused(source, op);
        }

        let new_source = match self.tensors.get_mut(&tensor) {
            Some(new_tensor) => {
                new_tensor.add_target(op);
                new_tensor.source()
            }
            None => None,
        };
        if let Some(source) = new_source {
            self.link(source, op);
        }

        self.sorted = false;
        Ok(())
    }

    /// Replace every use of `old` by `op` with `new`; returns the number of slots changed
    pub fn replace_input(&mut self, op: OpId, old: TensorId, new: TensorId) -> Result<usize> {
        let slots: Vec<usize> = self
            .operators
            .get(&op)
            .ok_or(Error::UnknownOperator(op))?
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == old)
            .map(|(slot, _)| slot)
            .collect();
        for &slot in &slots {
            self.replace_input_at(op, slot, new)?;
        }
        Ok(slots.len())
    }

    /// Unlink an operator from its tensors and neighbours, then drop it.
    ///
    /// Its output tensors stay in the graph without a producer.
    pub fn remove_operator(&mut self, op: OpId) -> Result<OperatorNode> {
        let node = self.operators.remove(&op).ok_or(Error::UnknownOperator(op))?;
        self.op_order.retain(|&id| id != op);

        for input in node.inputs() {
            if let Some(tensor) = self.tensors.get_mut(input) {
                tensor.remove_target(op);
            }
        }
        for output in node.outputs() {
            if let Some(tensor) = self.tensors.get_mut(output) {
                if tensor.source() == Some(op) {
                    tensor.set_source(None);
                }
            }
        }
        for pred in node.predecessors() {
            if let Some(pred) = self.operators.get_mut(pred) {
                pred.remove_successor(op);
            }
        }
        for succ in node.successors() {
            if let Some(succ) = self.operators.get_mut(succ) {
                succ.remove_predecessor(op);
            }
        }

        self.sorted = false;
        log::debug!("removed operator {} {}", op, node);
        Ok(node)
    }

    /// Drop a tensor that nothing produces or consumes any more
    pub fn remove_tensor(&mut self, id: TensorId) -> Result<TensorNode> {
        let tensor = self.tensors.get(&id).ok_or(Error::UnknownTensor(id))?;
        if !tensor.is_orphan() {
            return Err(Error::InvalidGraph(format!("tensor {} is still referenced", id)));
        }

        self.tensor_order.retain(|&t| t != id);
        self.sorted = false;
        self.tensors.remove(&id).ok_or(Error::UnknownTensor(id))
    }
}
