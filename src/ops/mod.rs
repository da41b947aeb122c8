pub mod kind;
pub mod registry;
pub mod tensor;

// Module files for math subdirectory
pub mod math {
    pub mod elementwise;
    pub mod matmul;
}

pub use kind::{BinaryOp, OpKind, OpType, UnaryOp};
pub use registry::{Operator, OperatorRegistry};
