use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::codegen::ExecutionOrder;
use crate::graph::{Graph, GraphError, TensorRole};

/// Position of program entry; graph inputs and constants become live here.
pub const ENTRY: usize = 0;

/// Inclusive span of execution positions during which a tensor's storage must stay valid.
///
/// Operator at step `i` of the execution order sits at position `i + 1`; graph outputs extend
/// to `len + 1`, past the last operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveRange {
    pub start: usize,
    pub end: usize,
}

impl LiveRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A tensor produced at the position where another is last read still overlaps it: outputs
    /// are allocated before the operator's inputs are released.
    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorLiveness {
    pub name: String,
    pub role: TensorRole,
    /// Execution step of the producing operator; `None` for inputs and constants.
    pub producer: Option<usize>,
    /// Distinct consuming execution steps, ascending.
    pub consumers: Vec<usize>,
    pub is_output: bool,
    pub range: LiveRange,
    /// Consumers plus one unit for external observers of graph outputs.
    pub refcount: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LivenessError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{role:?} tensor '{name}' is never consumed")]
    UnusedTensor { name: String, role: TensorRole },
    #[error("tensor '{tensor}' is consumed by {consumer} before its producer {producer}")]
    OrderViolation {
        tensor: String,
        producer: String,
        consumer: String,
    },
    #[error("tensor '{tensor}' is produced by both {first} and {second}")]
    MultipleProducers {
        tensor: String,
        first: String,
        second: String,
    },
    #[error("{role:?} tensor '{tensor}' is written by operator {op}")]
    ProducedInput {
        tensor: String,
        role: TensorRole,
        op: String,
    },
    #[error("tensor '{tensor}' has no producer")]
    Unproduced { tensor: String },
}

/// Per-tensor liveness derived from one walk over the execution order.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    pub tensors: Vec<TensorLiveness>,
    index: HashMap<String, usize>,
    steps: usize,
}

impl Liveness {
    pub fn get(&self, name: &str) -> Option<&TensorLiveness> {
        self.index.get(name).map(|idx| &self.tensors[*idx])
    }

    /// Position just past the last operator, where graph outputs stay live.
    pub fn exit(&self) -> usize {
        self.steps + 1
    }
}

/// Computes producer, consumers, live range and refcount for every tensor in the graph.
pub fn analyze(graph: &Graph, order: &ExecutionOrder) -> Result<Liveness, LivenessError> {
    let table = graph.tensor_table()?;
    let roles: Vec<TensorRole> = graph
        .tensors
        .iter()
        .map(|tensor| {
            graph
                .role(&tensor.name)
                .unwrap_or(TensorRole::Intermediate)
        })
        .collect();

    let mut producers: Vec<Option<usize>> = vec![None; graph.tensors.len()];
    for (step, op_index) in order.iter().enumerate() {
        let op = &graph.operators[op_index];
        for name in &op.outputs {
            let idx = lookup(&table, graph, op_index, name)?;
            if roles[idx] != TensorRole::Intermediate {
                return Err(LivenessError::ProducedInput {
                    tensor: name.clone(),
                    role: roles[idx],
                    op: op.describe(op_index),
                });
            }
            if let Some(first) = producers[idx] {
                let first_index = order.op_at(first);
                return Err(LivenessError::MultipleProducers {
                    tensor: name.clone(),
                    first: graph.operators[first_index].describe(first_index),
                    second: op.describe(op_index),
                });
            }
            producers[idx] = Some(step);
        }
    }

    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); graph.tensors.len()];
    for (step, op_index) in order.iter().enumerate() {
        let op = &graph.operators[op_index];
        for name in &op.inputs {
            let idx = lookup(&table, graph, op_index, name)?;
            match (roles[idx], producers[idx]) {
                (TensorRole::Intermediate, None) => {
                    return Err(LivenessError::Unproduced {
                        tensor: name.clone(),
                    })
                }
                (TensorRole::Intermediate, Some(producer)) if producer >= step => {
                    let producer_index = order.op_at(producer);
                    return Err(LivenessError::OrderViolation {
                        tensor: name.clone(),
                        producer: graph.operators[producer_index].describe(producer_index),
                        consumer: op.describe(op_index),
                    });
                }
                _ => {}
            }
            // An operator reading the same tensor on two ports is still one consumer.
            if consumers[idx].last() != Some(&step) {
                consumers[idx].push(step);
            }
        }
    }

    let exit = order.len() + 1;
    let mut liveness = Liveness {
        tensors: Vec::with_capacity(graph.tensors.len()),
        index: HashMap::with_capacity(graph.tensors.len()),
        steps: order.len(),
    };
    for (idx, tensor) in graph.tensors.iter().enumerate() {
        let role = roles[idx];
        let is_output = graph.is_output(&tensor.name);
        let used = std::mem::take(&mut consumers[idx]);
        if role == TensorRole::Intermediate && producers[idx].is_none() {
            return Err(LivenessError::Unproduced {
                tensor: tensor.name.clone(),
            });
        }
        // Dead operator results are tolerated; unread inputs and weights are not.
        if used.is_empty() && !is_output && role != TensorRole::Intermediate {
            return Err(LivenessError::UnusedTensor {
                name: tensor.name.clone(),
                role,
            });
        }

        let start = producers[idx].map_or(ENTRY, |step| step + 1);
        let end = if is_output {
            exit
        } else {
            used.last().map_or(start, |step| step + 1)
        };
        let refcount = used.len() + usize::from(is_output);
        tracing::trace!(
            tensor = %tensor.name,
            start,
            end,
            refcount,
            "live range"
        );
        liveness.index.insert(tensor.name.clone(), idx);
        liveness.tensors.push(TensorLiveness {
            name: tensor.name.clone(),
            role,
            producer: producers[idx],
            consumers: used,
            is_output,
            range: LiveRange::new(start, end),
            refcount,
        });
    }

    Ok(liveness)
}

fn lookup(
    table: &HashMap<&str, usize>,
    graph: &Graph,
    op_index: usize,
    name: &str,
) -> Result<usize, LivenessError> {
    table.get(name).copied().ok_or_else(|| {
        LivenessError::Graph(GraphError::UnknownTensor {
            op: graph.operators[op_index].describe(op_index),
            name: name.to_string(),
        })
    })
}
