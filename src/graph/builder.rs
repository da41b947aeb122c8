use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{DataType, OpId, OperatorNode, Shape, TensorId, TensorNode};
use crate::ops::{BinaryOp, OpKind, Operator, UnaryOp};

use super::GraphContainer;

// Construction helpers. Each creates the operator's output tensors with
// inferred shapes and registers the operator.
impl GraphContainer {
    /// Add an operator, creating outputs shaped by its shape inference.
    ///
    /// Outputs take the data type of the first input.
    pub fn add_operator(&mut self, kind: OpKind, inputs: Vec<TensorId>) -> Result<OpId> {
        let (shapes, data_type) = {
            let input_shapes = inputs
                .iter()
                .map(|t| self.tensor(*t).map(|t| t.shape()).ok_or(Error::UnknownTensor(*t)))
                .collect::<Result<Vec<&Shape>>>()?;
            let shapes = kind.infer_shapes(&input_shapes)?;
            let data_type = inputs
                .first()
                .and_then(|t| self.tensor(*t))
                .map_or(DataType::Float32, |t| t.data_type());
            (shapes, data_type)
        };

        let outputs: Vec<TensorNode> = shapes
            .into_iter()
            .map(|shape| TensorNode::new(shape, data_type, self.runtime()))
            .collect();
        let op = OperatorNode::new(kind, inputs, outputs.iter().map(|t| t.id()).collect())?;

        for tensor in outputs {
            self.insert_tensor(tensor)?;
        }
        self.register(op)
    }

    /// Add an operator over tensors that already exist
    pub fn add_operator_with_outputs(
        &mut self,
        kind: OpKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Result<OpId> {
        let op = OperatorNode::new(kind, inputs, outputs)?;
        self.register(op)
    }

    pub fn transpose(&mut self, input: TensorId, perm: Vec<usize>) -> Result<OpId> {
        self.add_operator(OpKind::Transpose { perm }, vec![input])
    }

    pub fn matmul(&mut self, a: TensorId, b: TensorId, trans_a: bool, trans_b: bool) -> Result<OpId> {
        self.add_operator(OpKind::MatMul { trans_a, trans_b }, vec![a, b])
    }

    pub fn binary(&mut self, op: BinaryOp, a: TensorId, b: TensorId) -> Result<OpId> {
        self.add_operator(OpKind::Binary(op), vec![a, b])
    }

    pub fn unary(&mut self, op: UnaryOp, input: TensorId) -> Result<OpId> {
        self.add_operator(OpKind::Unary(op), vec![input])
    }

    pub fn concat(&mut self, inputs: Vec<TensorId>, axis: usize) -> Result<OpId> {
        self.add_operator(OpKind::Concat { axis }, inputs)
    }

    pub fn custom(&mut self, op: Arc<dyn Operator>, inputs: Vec<TensorId>) -> Result<OpId> {
        self.add_operator(OpKind::Custom(op), inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn test_builder_links_chain() {
        let mut graph = GraphContainer::new(Runtime::cpu()).unwrap();
        let x = graph.add_tensor(vec![2, 3], DataType::Float16);
        let relu = graph.unary(UnaryOp::Relu, x).unwrap();
        let y = graph.output(relu, 0).unwrap();
        let t = graph.transpose(y, vec![1, 0]).unwrap();
        let z = graph.output(t, 0).unwrap();

        assert_eq!(graph.tensor(z).unwrap().shape(), &vec![3, 2]);
        assert_eq!(graph.tensor(z).unwrap().data_type(), DataType::Float16);
        assert_eq!(graph.operator(t).unwrap().predecessors(), &[relu]);
        assert_eq!(graph.operator(relu).unwrap().successors(), &[t]);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_builder_rejects_bad_shapes_without_side_effects() {
        let mut graph = GraphContainer::new(Runtime::cpu()).unwrap();
        let a = graph.add_tensor(vec![2, 3], DataType::Float32);
        let b = graph.add_tensor(vec![2, 3], DataType::Float32);

        assert!(graph.matmul(a, b, false, false).is_err());
        assert_eq!(graph.tensor_count(), 2);
        assert_eq!(graph.operator_count(), 0);

        let ok = graph.matmul(a, b, false, true).unwrap();
        assert_eq!(graph.tensor(graph.output(ok, 0).unwrap()).unwrap().shape(), &vec![2, 2]);
    }
}
