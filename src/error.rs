use thiserror::Error;

use crate::model::{OpId, TensorId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Shape inference failed for operator {op}: {reason}")]
    ShapeInference { op: OpId, reason: String },

    #[error("Tensor runtime mismatch: cannot add a tensor in {found} to {expected}")]
    RuntimeMismatch { expected: String, found: String },

    #[error("Duplicate tensor identity: {0}")]
    DuplicateTensor(TensorId),

    #[error("Unknown tensor: {0}")]
    UnknownTensor(TensorId),

    #[error("Unknown operator: {0}")]
    UnknownOperator(OpId),

    #[error("Allocator already materialized its arena; planning calls are no longer allowed")]
    AllocatorMaterialized,

    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(usize),

    #[error("Invalid free of {size} bytes at offset {offset}")]
    InvalidFree { offset: usize, size: usize },

    #[error("Memory limit of {limit} bytes exceeded with allocation of {requested} bytes (current: {current})")]
    MemoryLimitExceeded {
        limit: usize,
        requested: usize,
        current: usize,
    },

    #[error("Failed to allocate memory: {0}")]
    AllocationFailed(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] serde_json::Error),
}
