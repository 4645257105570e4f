//! Executable model of the deferred-evaluation runtime that generated code targets.
//!
//! Generated programs register every tensor with its planned storage and initial refcount,
//! enqueue operator evaluations, and flush the queue in order. [`EvalContext`] enforces the
//! same rules on the host so a plan can be replayed and checked before any code is rendered.

mod context;

pub use context::{ContextState, EvalContext, Event, NoopOperator, Operator, RuntimeError};

use serde::Serialize;

/// Backing storage of a registered tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Arena { offset: usize, size: usize },
    Rom,
}

impl Storage {
    fn overlaps(&self, other: &Storage) -> bool {
        match (*self, *other) {
            (
                Storage::Arena { offset: a, size: a_len },
                Storage::Arena { offset: b, size: b_len },
            ) => a_len > 0 && b_len > 0 && a < b + b_len && b < a + a_len,
            _ => false,
        }
    }
}

/// Handle passed to operators when they execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorHandle {
    pub name: String,
    pub storage: Storage,
}
