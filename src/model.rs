use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::memory::provider::Blob;
use crate::ops::OpKind;
use crate::runtime::Runtime;

/// Shape of a tensor
pub type Shape = Vec<usize>;

static NEXT_TENSOR_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_OP_ID: AtomicUsize = AtomicUsize::new(1);

/// Stable identity of a tensor, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(usize);

impl TensorId {
    fn next() -> Self {
        TensorId(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Stable identity of an operator, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(usize);

impl OpId {
    fn next() -> Self {
        OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op{}", self.0)
    }
}

/// Element types a tensor can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum DataType {
    Float32,
    Float64,
    Float16,
    BFloat16,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
}

impl DataType {
    /// Get the size in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float64 => 8,
            DataType::Float16 => 2,
            DataType::BFloat16 => 2,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::Uint8 => 1,
            DataType::Uint16 => 2,
            DataType::Uint32 => 4,
            DataType::Uint64 => 8,
            DataType::Bool => 1,
        }
    }

    /// Check if the data type is a floating point type
    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            DataType::Float32 | DataType::Float64 | DataType::Float16 | DataType::BFloat16
        )
    }
}

/// A tensor vertex of the graph.
///
/// Edges are identities of operators owned by the same `GraphContainer`;
/// they are maintained by the container and read-only from the outside.
#[derive(Debug, Clone)]
pub struct TensorNode {
    id: TensorId,
    shape: Shape,
    data_type: DataType,
    runtime: Runtime,
    source: Option<OpId>,
    targets: Vec<OpId>,
    blob: Option<Blob>,
}

impl TensorNode {
    pub fn new(shape: Shape, data_type: DataType, runtime: &Runtime) -> Self {
        Self {
            id: TensorId::next(),
            shape,
            data_type,
            runtime: runtime.clone(),
            source: None,
            targets: Vec::new(),
            blob: None,
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Producing operator, if any
    pub fn source(&self) -> Option<OpId> {
        self.source
    }

    /// Consuming operators
    pub fn targets(&self) -> &[OpId] {
        &self.targets
    }

    /// Bound memory, present once the graph has been through `data_malloc`
    pub fn blob(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.element_count() * self.data_type.size_in_bytes()
    }

    /// A tensor nothing produces and nothing consumes
    pub fn is_orphan(&self) -> bool {
        self.source.is_none() && self.targets.is_empty()
    }

    pub(crate) fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub(crate) fn set_source(&mut self, source: Option<OpId>) {
        self.source = source;
    }

    pub(crate) fn add_target(&mut self, op: OpId) {
        if !self.targets.contains(&op) {
            self.targets.push(op);
        }
    }

    pub(crate) fn remove_target(&mut self, op: OpId) {
        self.targets.retain(|&t| t != op);
    }

    pub(crate) fn bind_blob(&mut self, blob: Blob) {
        self.blob = Some(blob);
    }

    /// Forget every edge and binding
    pub(crate) fn detach(&mut self) {
        self.source = None;
        self.targets.clear();
        self.blob = None;
    }
}

impl fmt::Display for TensorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor {}, shape {:?}, dtype {}", self.id, self.shape, self.data_type)?;
        match self.source {
            Some(op) => write!(f, ", source {}", op)?,
            None => write!(f, ", source None")?,
        }
        let targets: Vec<String> = self.targets.iter().map(|t| t.to_string()).collect();
        write!(f, ", targets [{}]", targets.join(", "))?;
        if let Some(blob) = &self.blob {
            write!(f, ", offset {}", blob.offset())?;
        }
        Ok(())
    }
}

/// An operator vertex of the graph
#[derive(Debug, Clone)]
pub struct OperatorNode {
    id: OpId,
    kind: OpKind,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    predecessors: Vec<OpId>,
    successors: Vec<OpId>,
}

impl OperatorNode {
    /// Create an operator over existing tensors.
    ///
    /// Fails if the number of inputs or outputs does not fit the kind.
    pub fn new(kind: OpKind, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Result<Self> {
        let (min_inputs, max_inputs) = kind.input_arity();
        if inputs.len() < min_inputs || max_inputs.map_or(false, |max| inputs.len() > max) {
            return Err(Error::ValidationError(format!(
                "{} expects {} inputs, got {}",
                kind.op_type(),
                match max_inputs {
                    Some(max) if max == min_inputs => format!("{}", max),
                    Some(max) => format!("{}..={}", min_inputs, max),
                    None => format!("at least {}", min_inputs),
                },
                inputs.len()
            )));
        }
        if outputs.len() != kind.num_outputs() {
            return Err(Error::ValidationError(format!(
                "{} expects {} outputs, got {}",
                kind.op_type(),
                kind.num_outputs(),
                outputs.len()
            )));
        }

        Ok(Self {
            id: OpId::next(),
            kind,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
        })
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn predecessors(&self) -> &[OpId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[OpId] {
        &self.successors
    }

    pub(crate) fn kind_mut(&mut self) -> &mut OpKind {
        &mut self.kind
    }

    pub(crate) fn set_input(&mut self, slot: usize, tensor: TensorId) {
        self.inputs[slot] = tensor;
    }

    pub(crate) fn add_predecessor(&mut self, op: OpId) {
        if !self.predecessors.contains(&op) {
            self.predecessors.push(op);
        }
    }

    pub(crate) fn remove_predecessor(&mut self, op: OpId) {
        self.predecessors.retain(|&p| p != op);
    }

    pub(crate) fn add_successor(&mut self, op: OpId) {
        if !self.successors.contains(&op) {
            self.successors.push(op);
        }
    }

    pub(crate) fn remove_successor(&mut self, op: OpId) {
        self.successors.retain(|&s| s != op);
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &[TensorId]| ids.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",");
        write!(
            f,
            "{}([{}] -> [{}])",
            self.kind,
            join(&self.inputs),
            join(&self.outputs)
        )
    }
}
