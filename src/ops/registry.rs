use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::Shape;
use crate::ops::OpKind;

/// Trait for operator kinds defined outside this crate.
///
/// Such operators take part in sorting, shape inference and memory planning;
/// the optimizer never rewrites them.
pub trait Operator: Send + Sync + Debug {
    /// Name the operator is registered under
    fn name(&self) -> &str;

    /// Accepted number of inputs as `(min, max)`; `None` means unbounded
    fn input_arity(&self) -> (usize, Option<usize>);

    /// Number of outputs produced
    fn num_outputs(&self) -> usize {
        1
    }

    /// Infer output shapes
    fn output_shapes(&self, input_shapes: &[&Shape]) -> Result<Vec<Shape>>;
}

/// Registry of extension operators, keyed by name
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    /// Create a new operator registry
    pub fn new() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// Register an operator
    pub fn register_operator(&mut self, op: Arc<dyn Operator>) -> Result<()> {
        let name = op.name().to_string();

        if self.operators.contains_key(&name) {
            return Err(Error::InvalidOperator(format!(
                "Operator {} is already registered",
                name
            )));
        }

        self.operators.insert(name, op);
        Ok(())
    }

    /// Get an operator by name
    pub fn get_operator(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(name).cloned()
    }

    /// Build the operator kind for a registered name
    pub fn create_kind(&self, name: &str) -> Result<OpKind> {
        self.get_operator(name)
            .map(OpKind::Custom)
            .ok_or_else(|| Error::InvalidOperator(format!("Operator {} not found in registry", name)))
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
