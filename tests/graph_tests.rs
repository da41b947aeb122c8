use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use tensor_graph::{
    error::Result,
    memory::MemoryProvider,
    BinaryOp, DataType, Error, GraphContainer, OpKind, Operator, OperatorNode, OperatorRegistry, Runtime,
    RuntimeOptions, Shape, SystemProvider, TensorNode, UnaryOp,
};

// Helper to build a small two-layer network:
//   h = relu(x @ w1 + b1); y = h @ w2
fn create_mlp(graph: &mut GraphContainer) -> anyhow::Result<Vec<tensor_graph::TensorId>> {
    let x = graph.add_tensor(vec![8, 16], DataType::Float32);
    let w1 = graph.add_tensor(vec![16, 32], DataType::Float32);
    let b1 = graph.add_tensor(vec![32], DataType::Float32);
    let w2 = graph.add_tensor(vec![32, 4], DataType::Float32);

    let mm1 = graph.matmul(x, w1, false, false)?;
    let xw = graph.output(mm1, 0).unwrap();
    let add = graph.binary(BinaryOp::Add, xw, b1)?;
    let pre = graph.output(add, 0).unwrap();
    let relu = graph.unary(UnaryOp::Relu, pre)?;
    let h = graph.output(relu, 0).unwrap();
    let mm2 = graph.matmul(h, w2, false, false)?;
    let y = graph.output(mm2, 0).unwrap();

    Ok(vec![x, w1, b1, w2, xw, pre, h, y])
}

fn assert_order_respects_dependencies(graph: &GraphContainer) {
    let position: HashMap<_, _> = graph.operator_ids().iter().enumerate().map(|(i, &op)| (op, i)).collect();
    for op in graph.operators() {
        for pred in op.predecessors() {
            assert!(position[pred] < position[&op.id()], "{} scheduled before {}", op.id(), pred);
        }
    }
}

#[test]
fn test_register_links_both_directions() -> anyhow::Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let tensors = create_mlp(&mut graph)?;
    let (x, xw, pre) = (tensors[0], tensors[4], tensors[5]);

    let mm1 = graph.tensor(xw).unwrap().source().unwrap();
    let add = graph.tensor(pre).unwrap().source().unwrap();

    assert_eq!(graph.tensor(x).unwrap().targets(), &[mm1]);
    assert_eq!(graph.operator(mm1).unwrap().successors(), &[add]);
    assert_eq!(graph.operator(add).unwrap().predecessors(), &[mm1]);
    assert!(graph.operator(mm1).unwrap().predecessors().is_empty());
    graph.check_valid()?;
    Ok(())
}

#[test]
fn test_register_links_consumers_registered_first() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4, 4], DataType::Float32);
    let y = graph.add_tensor(vec![4, 4], DataType::Float32);
    let z = graph.add_tensor(vec![4, 4], DataType::Float32);

    let consumer = graph.register(OperatorNode::new(OpKind::Unary(UnaryOp::Tanh), vec![y], vec![z])?)?;
    let producer = graph.register(OperatorNode::new(OpKind::Unary(UnaryOp::Abs), vec![x], vec![y])?)?;

    assert_eq!(graph.operator(producer).unwrap().successors(), &[consumer]);
    assert_eq!(graph.operator(consumer).unwrap().predecessors(), &[producer]);
    graph.check_valid()
}

#[test]
fn test_shared_input_links_once() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4, 4], DataType::Float32);
    let relu = graph.unary(UnaryOp::Relu, x)?;
    let y = graph.output(relu, 0).unwrap();
    let square = graph.binary(BinaryOp::Mul, y, y)?;

    assert_eq!(graph.tensor(y).unwrap().targets(), &[square]);
    assert_eq!(graph.operator(relu).unwrap().successors(), &[square]);
    assert_eq!(graph.operator(square).unwrap().predecessors(), &[relu]);
    graph.check_valid()
}

#[test]
fn test_double_registration_is_rejected() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4], DataType::Float32);
    let y = graph.add_tensor(vec![4], DataType::Float32);
    let op = OperatorNode::new(OpKind::Unary(UnaryOp::Relu), vec![x], vec![y])?;

    graph.register(op.clone())?;
    assert!(matches!(graph.register(op), Err(Error::InvalidGraph(_))));
    assert_eq!(graph.tensor(x).unwrap().targets().len(), 1);
    Ok(())
}

#[test]
fn test_second_producer_is_rejected() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4], DataType::Float32);
    let y = graph.add_tensor(vec![4], DataType::Float32);
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![x], vec![y])?;

    let result = graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Abs), vec![x], vec![y]);
    assert!(matches!(result, Err(Error::InvalidGraph(_))));
    assert_eq!(graph.operator_count(), 1);
    Ok(())
}

#[test]
fn test_foreign_runtime_tensor_is_rejected() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let other = Runtime::cpu();
    let tensor = TensorNode::new(vec![2], DataType::Int32, &other);

    assert!(matches!(graph.insert_tensor(tensor), Err(Error::RuntimeMismatch { .. })));
    assert_eq!(graph.tensor_count(), 0);
    Ok(())
}

#[test]
fn test_duplicate_tensor_is_rejected() -> Result<()> {
    let runtime = Runtime::cpu();
    let mut graph = GraphContainer::new(runtime.clone())?;
    let tensor = TensorNode::new(vec![2], DataType::Int32, &runtime);

    let id = graph.insert_tensor(tensor.clone())?;
    match graph.insert_tensor(tensor) {
        Err(Error::DuplicateTensor(dup)) => assert_eq!(dup, id),
        other => panic!("expected duplicate tensor error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_orphan_tensor_fails_validity() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4], DataType::Float32);
    graph.unary(UnaryOp::Relu, x)?;
    graph.check_valid()?;

    graph.add_tensor(vec![4], DataType::Float32);
    assert!(matches!(graph.check_valid(), Err(Error::InvalidGraph(_))));
    Ok(())
}

#[test]
fn test_topological_sort_matches_dependency_graph() -> anyhow::Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let a = graph.add_tensor(vec![4, 4], DataType::Float32);
    let b = graph.add_tensor(vec![4, 4], DataType::Float32);
    let c = graph.add_tensor(vec![4, 4], DataType::Float32);
    let d = graph.add_tensor(vec![4, 4], DataType::Float32);
    let e = graph.add_tensor(vec![4, 4], DataType::Float32);

    // Registered consumers first so the container order is not already valid
    graph.add_operator_with_outputs(OpKind::Binary(BinaryOp::Add), vec![c, d], vec![e])?;
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![b], vec![d])?;
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Sigmoid), vec![b], vec![c])?;
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Abs), vec![a], vec![b])?;

    assert!(toposort(&graph.dependency_graph(), None).is_ok());
    assert!(graph.topological_sort());
    assert_order_respects_dependencies(&graph);

    // Sorting again is a no-op
    let order = graph.operator_ids().to_vec();
    assert!(graph.topological_sort());
    assert_eq!(graph.operator_ids(), order.as_slice());
    Ok(())
}

#[test]
fn test_cycle_is_reported_not_fatal() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let a = graph.add_tensor(vec![4], DataType::Float32);
    let b = graph.add_tensor(vec![4], DataType::Float32);
    let c = graph.add_tensor(vec![4], DataType::Float32);
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![a], vec![b])?;
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![b], vec![c])?;
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![c], vec![a])?;

    assert!(toposort(&graph.dependency_graph(), None).is_err());
    assert!(!graph.topological_sort());
    assert!(matches!(graph.data_malloc(), Err(Error::InvalidGraph(_))));
    Ok(())
}

#[test]
fn test_replace_input_moves_edges() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4], DataType::Float32);
    let relu = graph.unary(UnaryOp::Relu, x)?;
    let abs = graph.unary(UnaryOp::Abs, x)?;
    let r = graph.output(relu, 0).unwrap();
    let a = graph.output(abs, 0).unwrap();
    let add = graph.binary(BinaryOp::Add, r, r)?;

    assert_eq!(graph.replace_input(add, r, a)?, 2);

    assert!(graph.tensor(r).unwrap().targets().is_empty());
    assert_eq!(graph.tensor(a).unwrap().targets(), &[add]);
    assert!(graph.operator(relu).unwrap().successors().is_empty());
    assert_eq!(graph.operator(add).unwrap().predecessors(), &[abs]);

    graph.remove_operator(relu)?;
    graph.remove_tensor(r)?;
    graph.check_valid()
}

#[test]
fn test_remove_referenced_tensor_fails() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4], DataType::Float32);
    graph.unary(UnaryOp::Relu, x)?;
    assert!(matches!(graph.remove_tensor(x), Err(Error::InvalidGraph(_))));
    assert!(graph.contains_tensor(x));
    Ok(())
}

#[test]
fn test_shape_infer_after_reshaped_input() -> anyhow::Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let tensors = create_mlp(&mut graph)?;
    assert_eq!(graph.tensor(tensors[7]).unwrap().shape(), &vec![8, 4]);

    // Recreate the graph with a larger batch
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![64, 16], DataType::Float32);
    let w = graph.add_tensor(vec![16, 32], DataType::Float32);
    let out = graph.add_tensor(vec![], DataType::Float32);
    let relu_out = graph.add_tensor(vec![], DataType::Float32);
    graph.add_operator_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![out], vec![relu_out])?;
    graph.add_operator_with_outputs(OpKind::MatMul { trans_a: false, trans_b: false }, vec![x, w], vec![out])?;

    assert!(graph.topological_sort());
    graph.shape_infer()?;
    assert_eq!(graph.tensor(out).unwrap().shape(), &vec![64, 32]);
    assert_eq!(graph.tensor(relu_out).unwrap().shape(), &vec![64, 32]);
    Ok(())
}

#[derive(Debug)]
struct Split;

impl Operator for Split {
    fn name(&self) -> &str {
        "Split"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn num_outputs(&self) -> usize {
        2
    }

    fn output_shapes(&self, input_shapes: &[&Shape]) -> Result<Vec<Shape>> {
        let mut half = input_shapes[0].clone();
        half[0] /= 2;
        Ok(vec![half.clone(), half])
    }
}

#[derive(Debug)]
struct Broken;

impl Operator for Broken {
    fn name(&self) -> &str {
        "Broken"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn num_outputs(&self) -> usize {
        2
    }

    fn output_shapes(&self, input_shapes: &[&Shape]) -> Result<Vec<Shape>> {
        Ok(vec![input_shapes[0].clone()])
    }
}

#[test]
fn test_custom_operator_from_registry() -> anyhow::Result<()> {
    let mut registry = OperatorRegistry::new();
    registry.register_operator(Arc::new(Split))?;

    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![8, 3], DataType::Float32);
    let split = graph.add_operator(registry.create_kind("Split")?, vec![x])?;

    let outputs = graph.operator(split).unwrap().outputs().to_vec();
    assert_eq!(outputs.len(), 2);
    for output in outputs {
        assert_eq!(graph.tensor(output).unwrap().shape(), &vec![4, 3]);
    }
    Ok(())
}

#[test]
fn test_shape_count_mismatch_is_fatal() -> Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let x = graph.add_tensor(vec![4], DataType::Float32);
    let y = graph.add_tensor(vec![4], DataType::Float32);
    let z = graph.add_tensor(vec![4], DataType::Float32);
    let op = graph.add_operator_with_outputs(OpKind::Custom(Arc::new(Broken)), vec![x], vec![y, z])?;

    match graph.shape_infer() {
        Err(Error::ShapeInference { op: failed, .. }) => assert_eq!(failed, op),
        other => panic!("expected shape inference failure, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_data_malloc_binds_disjoint_regions() -> anyhow::Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    let tensors = create_mlp(&mut graph)?;
    assert!(graph.topological_sort());

    let plan = graph.data_malloc()?;
    assert_eq!(plan.allocations.len(), tensors.len());

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &id in &tensors {
        let tensor = graph.tensor(id).unwrap();
        let blob = tensor.blob().expect("every tensor is bound");
        assert_eq!(blob.offset() % plan.alignment, 0);
        assert!(blob.offset() + tensor.size_in_bytes() <= plan.peak_bytes);
        ranges.push((blob.offset(), blob.offset() + tensor.size_in_bytes()));
    }
    ranges.sort();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }

    let json = plan.to_json()?;
    assert!(json.contains("\"peak_bytes\""));
    Ok(())
}

#[test]
fn test_arena_materialized_once_and_released() -> anyhow::Result<()> {
    let provider = Arc::new(SystemProvider::new(None));
    let runtime = Runtime::new("counted", provider.clone(), RuntimeOptions::default());
    let mut graph = GraphContainer::new(runtime)?;
    create_mlp(&mut graph)?;
    assert!(graph.topological_sort());

    let plan = graph.data_malloc()?;
    assert_eq!(provider.allocation_count(), 1);
    assert_eq!(provider.allocated_memory(), plan.peak_bytes);

    // Planning is closed once the arena exists
    assert!(matches!(graph.data_malloc(), Err(Error::AllocatorMaterialized)));
    assert_eq!(provider.allocation_count(), 1);

    drop(graph);
    assert_eq!(provider.allocated_memory(), 0);
    Ok(())
}

#[test]
fn test_reuse_shrinks_arena() -> anyhow::Result<()> {
    let build = |reuse: bool| -> anyhow::Result<usize> {
        let options = RuntimeOptions::new().reuse_intermediate_buffers(reuse);
        let mut graph = GraphContainer::new(Runtime::cpu_with_options(options))?;
        let x = graph.add_tensor(vec![256], DataType::Float32);
        let mut current = x;
        for _ in 0..6 {
            let op = graph.unary(UnaryOp::Relu, current)?;
            current = graph.output(op, 0).unwrap();
        }
        assert!(graph.topological_sort());
        let plan = graph.data_malloc()?;
        assert_eq!(plan.allocations.len(), 7);
        Ok(plan.peak_bytes)
    };

    let without_reuse = build(false)?;
    let with_reuse = build(true)?;
    assert_eq!(without_reuse, 7 * 1024);
    assert!(with_reuse < without_reuse, "{} >= {}", with_reuse, without_reuse);
    Ok(())
}

#[test]
fn test_display_and_dot() -> anyhow::Result<()> {
    let mut graph = GraphContainer::new(Runtime::cpu())?;
    create_mlp(&mut graph)?;

    let text = graph.to_string();
    assert!(text.starts_with("Graph Tensors:"));
    assert!(text.contains("Graph operators:"));
    assert!(text.contains("MatMul[A,B]"));

    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("Relu"));
    Ok(())
}
