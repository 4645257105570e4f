//! Output assembly and C++ rendering.

pub mod assembler;
pub mod render;
pub mod utils;

use serde::Serialize;
use thiserror::Error;

use crate::graph::Graph;

pub use assembler::{assemble, AssembleOptions, EmissionPolicy, EmitStep};
pub use render::Renderer;

/// Order in which operators are planned, evaluated and emitted.
///
/// Liveness, placement, deduplication and the emitted flush sequence all walk this one
/// order; step `i` executes operator `op_at(i)` of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOrder {
    ops: Vec<usize>,
}

impl ExecutionOrder {
    /// The graph's own operator order, which the frontend guarantees is topological.
    pub fn of(graph: &Graph) -> Self {
        Self {
            ops: (0..graph.operators.len()).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.ops.iter().copied()
    }

    pub fn op_at(&self, step: usize) -> usize {
        self.ops[step]
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("operator {op} has no deduplicated instance")]
    MissingInstance { op: String },
    #[error("tensor '{tensor}' has no plan entry")]
    MissingPlanEntry { tensor: String },
    #[error("no handler registered for operator type '{op_type}'")]
    MissingHandler { op_type: String },
}
