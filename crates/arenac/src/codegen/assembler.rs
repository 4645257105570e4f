use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::graph::{Graph, TensorRole};
use crate::plan::{InstanceId, InstanceTable, MemoryPlan};

use super::{EmitError, ExecutionOrder};

/// When pending evaluations are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionPolicy {
    /// Batch evaluations and flush only at barriers and at the end.
    #[default]
    Lazy,
    /// Flush after every evaluation.
    Eager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssembleOptions {
    pub policy: EmissionPolicy,
    /// Lazy mode flushes once this many evaluations are pending.
    pub max_pending: Option<usize>,
}

/// One statement of the generated program, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmitStep {
    Declare { instance: InstanceId },
    Construct { instance: InstanceId },
    Register { tensor: String },
    Enqueue {
        step: usize,
        op_index: usize,
        instance: InstanceId,
    },
    Flush,
}

/// Sequences declarations, registrations, evaluations and flushes for one compiled graph.
///
/// Graph inputs and constants are registered up front. Each operator's outputs are registered
/// immediately before its evaluation. In lazy mode a flush barrier is inserted whenever an
/// output's slot was handed over by an operator that has not run yet, since the previous
/// owner is only released when that operator executes.
pub fn assemble(
    graph: &Graph,
    order: &ExecutionOrder,
    plan: &MemoryPlan,
    instances: &InstanceTable,
    options: &AssembleOptions,
) -> Result<Vec<EmitStep>, EmitError> {
    let mut steps = Vec::new();
    for entry in &plan.entries {
        if entry.role != TensorRole::Intermediate {
            steps.push(EmitStep::Register {
                tensor: entry.name.clone(),
            });
        }
    }

    let mut declared: HashSet<InstanceId> = HashSet::new();
    let mut first_pending: Option<usize> = None;
    let mut pending = 0usize;
    let mut barriers = 0usize;

    for (step, op_index) in order.iter().enumerate() {
        let op = &graph.operators[op_index];
        let instance = instances
            .instance_of(op_index)
            .ok_or_else(|| EmitError::MissingInstance {
                op: op.describe(op_index),
            })?;
        if declared.insert(instance.id) {
            steps.push(EmitStep::Declare {
                instance: instance.id,
            });
            steps.push(EmitStep::Construct {
                instance: instance.id,
            });
        }

        if let Some(first) = first_pending {
            let mut needs_barrier = false;
            for name in &op.outputs {
                let entry = plan.entry(name).ok_or_else(|| EmitError::MissingPlanEntry {
                    tensor: name.clone(),
                })?;
                if entry.available_after.is_some_and(|released| released >= first) {
                    needs_barrier = true;
                }
            }
            if needs_barrier {
                tracing::trace!(step, "flush barrier");
                steps.push(EmitStep::Flush);
                first_pending = None;
                pending = 0;
                barriers += 1;
            }
        }

        for name in &op.outputs {
            steps.push(EmitStep::Register {
                tensor: name.clone(),
            });
        }
        steps.push(EmitStep::Enqueue {
            step,
            op_index,
            instance: instance.id,
        });
        first_pending.get_or_insert(step);
        pending += 1;

        let flush_now = match options.policy {
            EmissionPolicy::Eager => true,
            EmissionPolicy::Lazy => options.max_pending.is_some_and(|limit| pending >= limit),
        };
        if flush_now {
            steps.push(EmitStep::Flush);
            first_pending = None;
            pending = 0;
        }
    }
    if pending > 0 {
        steps.push(EmitStep::Flush);
    }

    tracing::debug!(
        policy = ?options.policy,
        steps = steps.len(),
        barriers,
        "assembled emission steps"
    );
    Ok(steps)
}
