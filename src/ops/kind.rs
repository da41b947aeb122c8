use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::model::Shape;
use crate::ops::math::elementwise::broadcast_shapes;
use crate::ops::math::matmul::matmul_output_shape;
use crate::ops::registry::Operator;
use crate::ops::tensor::{concat_output_shape, transpose_output_shape};

/// Tag of an operator kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum OpType {
    Transpose,
    MatMul,
    Add,
    Sub,
    Mul,
    Div,
    Relu,
    Sigmoid,
    Tanh,
    Abs,
    Concat,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
    Abs,
}

/// Operator kind with its attributes
#[derive(Debug, Clone)]
pub enum OpKind {
    /// Reorder axes: output axis `i` is input axis `perm[i]`
    Transpose { perm: Vec<usize> },
    /// Batched matrix multiply with optional transposition of either operand
    MatMul { trans_a: bool, trans_b: bool },
    /// Broadcasting element-wise binary arithmetic
    Binary(BinaryOp),
    /// Shape-preserving element-wise function
    Unary(UnaryOp),
    /// Join inputs along `axis`
    Concat { axis: usize },
    /// Operator supplied through the [`Operator`] trait
    Custom(Arc<dyn Operator>),
}

impl OpKind {
    pub fn op_type(&self) -> OpType {
        match self {
            OpKind::Transpose { .. } => OpType::Transpose,
            OpKind::MatMul { .. } => OpType::MatMul,
            OpKind::Binary(BinaryOp::Add) => OpType::Add,
            OpKind::Binary(BinaryOp::Sub) => OpType::Sub,
            OpKind::Binary(BinaryOp::Mul) => OpType::Mul,
            OpKind::Binary(BinaryOp::Div) => OpType::Div,
            OpKind::Unary(UnaryOp::Relu) => OpType::Relu,
            OpKind::Unary(UnaryOp::Sigmoid) => OpType::Sigmoid,
            OpKind::Unary(UnaryOp::Tanh) => OpType::Tanh,
            OpKind::Unary(UnaryOp::Abs) => OpType::Abs,
            OpKind::Concat { .. } => OpType::Concat,
            OpKind::Custom(_) => OpType::Custom,
        }
    }

    /// Accepted number of inputs as `(min, max)`; `None` means unbounded
    pub fn input_arity(&self) -> (usize, Option<usize>) {
        match self {
            OpKind::Transpose { .. } | OpKind::Unary(_) => (1, Some(1)),
            OpKind::MatMul { .. } | OpKind::Binary(_) => (2, Some(2)),
            OpKind::Concat { .. } => (1, None),
            OpKind::Custom(op) => op.input_arity(),
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            OpKind::Custom(op) => op.num_outputs(),
            _ => 1,
        }
    }

    /// Infer output shapes from the current input shapes
    pub fn infer_shapes(&self, inputs: &[&Shape]) -> Result<Vec<Shape>> {
        let (min_inputs, max_inputs) = self.input_arity();
        if inputs.len() < min_inputs || max_inputs.map_or(false, |max| inputs.len() > max) {
            return Err(Error::ValidationError(format!(
                "{} cannot infer shapes from {} inputs",
                self.op_type(),
                inputs.len()
            )));
        }

        let shape = match self {
            OpKind::Transpose { perm } => transpose_output_shape(inputs[0], perm)?,
            OpKind::MatMul { trans_a, trans_b } => matmul_output_shape(inputs[0], inputs[1], *trans_a, *trans_b)?,
            OpKind::Binary(_) => broadcast_shapes(inputs[0], inputs[1])?,
            OpKind::Unary(_) => inputs[0].clone(),
            OpKind::Concat { axis } => concat_output_shape(inputs, *axis)?,
            OpKind::Custom(op) => return op.output_shapes(inputs),
        };
        Ok(vec![shape])
    }

    /// Permutation vector of a transpose
    pub fn permutation(&self) -> Option<&[usize]> {
        match self {
            OpKind::Transpose { perm } => Some(perm.as_slice()),
            _ => None,
        }
    }

    /// `(trans_a, trans_b)` of a matmul
    pub fn transpose_flags(&self) -> Option<(bool, bool)> {
        match self {
            OpKind::MatMul { trans_a, trans_b } => Some((*trans_a, *trans_b)),
            _ => None,
        }
    }

    /// Flip the transpose flag of matmul operand `slot`.
    ///
    /// Returns false for any other kind or slot.
    pub fn toggle_transpose(&mut self, slot: usize) -> bool {
        match (self, slot) {
            (OpKind::MatMul { trans_a, .. }, 0) => {
                *trans_a = !*trans_a;
                true
            }
            (OpKind::MatMul { trans_b, .. }, 1) => {
                *trans_b = !*trans_b;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Transpose { perm } => write!(f, "Transpose{:?}", perm),
            OpKind::MatMul { trans_a, trans_b } => write!(
                f,
                "MatMul[{},{}]",
                if *trans_a { "A^T" } else { "A" },
                if *trans_b { "B^T" } else { "B" }
            ),
            OpKind::Concat { axis } => write!(f, "Concat(axis={})", axis),
            OpKind::Custom(op) => write!(f, "{}", op.name()),
            other => write!(f, "{}", other.op_type()),
        }
    }
}
