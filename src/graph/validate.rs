use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};
use crate::model::{OpId, TensorId};

use super::GraphContainer;

impl GraphContainer {
    /// Verify the structural invariants of the graph.
    ///
    /// Every tensor must be produced or consumed, every edge must point at a
    /// member of this graph, tensor links must mirror operator inputs and
    /// outputs, and operator neighbour sets must match the producers and
    /// consumers of their tensors.
    pub fn check_valid(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.tensor_order.len());
        for &id in &self.tensor_order {
            if !seen.insert(id) {
                return Err(Error::DuplicateTensor(id));
            }
        }
        if seen.len() != self.tensors.len() {
            return Err(Error::InvalidGraph("tensor order out of sync with tensor table".to_string()));
        }
        let unique_ops: HashSet<OpId> = self.op_order.iter().copied().collect();
        if unique_ops.len() != self.op_order.len() || unique_ops.len() != self.operators.len() {
            return Err(Error::InvalidGraph("operator order out of sync with operator table".to_string()));
        }

        for tensor in self.tensors() {
            let id = tensor.id();
            if tensor.is_orphan() {
                return Err(Error::InvalidGraph(format!("tensor {} has neither source nor targets", id)));
            }
            if let Some(source) = tensor.source() {
                let op = self.operators.get(&source).ok_or_else(|| {
                    Error::InvalidGraph(format!("tensor {} is produced by unknown operator {}", id, source))
                })?;
                if !op.outputs().contains(&id) {
                    return Err(Error::InvalidGraph(format!("tensor {} is not an output of its source {}", id, source)));
                }
            }
            for &target in tensor.targets() {
                let op = self.operators.get(&target).ok_or_else(|| {
                    Error::InvalidGraph(format!("tensor {} is consumed by unknown operator {}", id, target))
                })?;
                if !op.inputs().contains(&id) {
                    return Err(Error::InvalidGraph(format!("tensor {} is not an input of its target {}", id, target)));
                }
            }
        }

        for op in self.operators() {
            let id = op.id();
            let mut expected_preds = HashSet::new();
            for input in op.inputs() {
                let tensor = self.tensors.get(input).ok_or(Error::UnknownTensor(*input))?;
                if !tensor.targets().contains(&id) {
                    return Err(Error::InvalidGraph(format!("{} does not list {} as a target", input, id)));
                }
                expected_preds.extend(tensor.source());
            }

            let mut expected_succs = HashSet::new();
            for output in op.outputs() {
                let tensor = self.tensors.get(output).ok_or(Error::UnknownTensor(*output))?;
                if tensor.source() != Some(id) {
                    return Err(Error::InvalidGraph(format!("{} does not list {} as its source", output, id)));
                }
                expected_succs.extend(tensor.targets().iter().copied());
            }

            let preds: HashSet<OpId> = op.predecessors().iter().copied().collect();
            let succs: HashSet<OpId> = op.successors().iter().copied().collect();
            if preds != expected_preds {
                return Err(Error::InvalidGraph(format!("predecessors of {} disagree with its inputs", id)));
            }
            if succs != expected_succs {
                return Err(Error::InvalidGraph(format!("successors of {} disagree with its outputs", id)));
            }
        }

        Ok(())
    }

    /// Operator dependency graph: one node per operator, one edge per
    /// tensor flowing from its producer to a consumer.
    pub fn dependency_graph(&self) -> DiGraph<OpId, TensorId> {
        let mut graph = DiGraph::with_capacity(self.operators.len(), self.tensors.len());
        let nodes: HashMap<OpId, NodeIndex> = self
            .op_order
            .iter()
            .map(|&op| (op, graph.add_node(op)))
            .collect();

        for tensor in self.tensors() {
            let Some(from) = tensor.source().and_then(|s| nodes.get(&s)) else { continue };
            for target in tensor.targets() {
                if let Some(&to) = nodes.get(target) {
                    graph.add_edge(*from, to, tensor.id());
                }
            }
        }
        graph
    }

    /// Graphviz rendering of the operator dependency graph
    pub fn to_dot(&self) -> String {
        let labelled = self.dependency_graph().map(
            |_, op| match self.operators.get(op) {
                Some(node) => format!("{}: {}", op, node.kind()),
                None => op.to_string(),
            },
            |_, tensor| tensor.to_string(),
        );
        format!("{}", Dot::new(&labelled))
    }
}

impl fmt::Display for GraphContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Tensors:")?;
        for tensor in self.tensors() {
            writeln!(f, "{}", tensor)?;
        }
        writeln!(f, "Graph operators:")?;
        for op in self.operators() {
            writeln!(
                f,
                "OP {}, pred {:?}, succ {:?}, {}",
                op.id().raw(),
                op.predecessors().iter().map(|p| p.raw()).collect::<Vec<_>>(),
                op.successors().iter().map(|s| s.raw()).collect::<Vec<_>>(),
                op
            )?;
        }
        Ok(())
    }
}
