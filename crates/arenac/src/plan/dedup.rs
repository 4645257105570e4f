use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::codegen::utils::sanitize_symbol;
use crate::codegen::ExecutionOrder;
use crate::graph::{ConstructParam, Graph, OpNode, TypeSignature};
use crate::hashing::canonical_bytes;
use crate::registry::{OperatorRegistry, ParamKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub usize);

/// Identity of a runtime operator instance: two operators with equal keys share one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupKey {
    pub namespace: String,
    pub op_type: String,
    pub signature: TypeSignature,
    pub params: Vec<ConstructParam>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorInstance {
    pub id: InstanceId,
    /// Variable name used in emitted code, e.g. `op_add_000`.
    pub var: String,
    pub key: DedupKey,
    /// Execution steps evaluating this instance, ascending.
    pub occurrences: Vec<usize>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DedupError {
    #[error("no handler registered for operator {op}")]
    UnsupportedOperator { op: String },
    #[error(
        "operator {op} has {inputs} inputs and {outputs} outputs, handler expects \
         {expected_inputs} and {expected_outputs}"
    )]
    ArityMismatch {
        op: String,
        inputs: usize,
        outputs: usize,
        expected_inputs: usize,
        expected_outputs: usize,
    },
    #[error("operator {op} parameters {found:?} do not match {expected:?}")]
    ParameterMismatch {
        op: String,
        expected: Vec<ParamKind>,
        found: Vec<ParamKind>,
    },
    #[error("operator {op} parameter {position} is NaN")]
    UnstableParameter { op: String, position: usize },
    #[error("operator {op} references an undeclared tensor")]
    MissingSignature { op: String },
    #[error("failed to encode key of operator {op}: {message}")]
    Encoding { op: String, message: String },
}

/// Instances in allocation order plus the instance evaluated by each operator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstanceTable {
    pub instances: Vec<OperatorInstance>,
    #[serde(skip)]
    by_op: Vec<Option<InstanceId>>,
}

impl InstanceTable {
    pub fn get(&self, id: InstanceId) -> Option<&OperatorInstance> {
        self.instances.get(id.0)
    }

    /// Instance evaluated by the operator at `op_index` of the graph.
    pub fn instance_of(&self, op_index: usize) -> Option<&OperatorInstance> {
        let id = self.by_op.get(op_index).copied().flatten()?;
        self.get(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Collapses operators with identical configuration onto shared instances.
///
/// Instances are numbered in order of first occurrence along `order`, so the table is a pure
/// function of the graph and the registry.
pub fn deduplicate(
    graph: &Graph,
    order: &ExecutionOrder,
    registry: &OperatorRegistry,
) -> Result<InstanceTable, DedupError> {
    let mut seen: HashMap<Vec<u8>, InstanceId> = HashMap::new();
    let mut table = InstanceTable {
        instances: Vec::new(),
        by_op: vec![None; graph.operators.len()],
    };

    for (step, op_index) in order.iter().enumerate() {
        let op = &graph.operators[op_index];
        let key = dedup_key(graph, op, op_index, registry)?;
        let bytes = canonical_bytes(&key).map_err(|err| DedupError::Encoding {
            op: op.describe(op_index),
            message: err.to_string(),
        })?;

        let id = match seen.get(&bytes) {
            Some(id) => {
                table.instances[id.0].occurrences.push(step);
                *id
            }
            None => {
                let id = InstanceId(table.instances.len());
                let var = format!(
                    "op_{}_{:03}",
                    sanitize_symbol(&key.op_type).to_ascii_lowercase(),
                    id.0
                );
                tracing::debug!(op = %op.describe(op_index), %var, "new operator instance");
                table.instances.push(OperatorInstance {
                    id,
                    var,
                    key,
                    occurrences: vec![step],
                });
                seen.insert(bytes, id);
                id
            }
        };
        table.by_op[op_index] = Some(id);
    }

    tracing::info!(
        operators = order.len(),
        instances = table.instances.len(),
        "operator deduplication complete"
    );
    Ok(table)
}

/// Builds the canonical key of one operator, checking it against its registered handler.
pub fn dedup_key(
    graph: &Graph,
    op: &OpNode,
    op_index: usize,
    registry: &OperatorRegistry,
) -> Result<DedupKey, DedupError> {
    let describe = || op.describe(op_index);
    let handler = registry
        .get(&op.op_type)
        .ok_or_else(|| DedupError::UnsupportedOperator { op: describe() })?;
    let descriptor = handler.descriptor();

    if op.inputs.len() != descriptor.inputs.len() || op.outputs.len() != descriptor.outputs.len()
    {
        return Err(DedupError::ArityMismatch {
            op: describe(),
            inputs: op.inputs.len(),
            outputs: op.outputs.len(),
            expected_inputs: descriptor.inputs.len(),
            expected_outputs: descriptor.outputs.len(),
        });
    }

    let shape_matches = op.params.len() == descriptor.params.len()
        && op
            .params
            .iter()
            .zip(&descriptor.params)
            .all(|(param, kind)| kind.matches(param));
    if !shape_matches {
        return Err(DedupError::ParameterMismatch {
            op: describe(),
            expected: descriptor.params.clone(),
            found: op.params.iter().map(kind_of).collect(),
        });
    }

    let mut params = Vec::with_capacity(op.params.len());
    for (position, param) in op.params.iter().enumerate() {
        let normalized = normalize(param)
            .ok_or_else(|| DedupError::UnstableParameter { op: describe(), position })?;
        params.push(normalized);
    }

    let signature = graph
        .signature(op)
        .ok_or_else(|| DedupError::MissingSignature { op: describe() })?;

    Ok(DedupKey {
        namespace: op
            .namespace
            .clone()
            .unwrap_or_else(|| descriptor.namespace.clone()),
        op_type: op.op_type.clone(),
        signature,
        params,
    })
}

fn kind_of(param: &ConstructParam) -> ParamKind {
    match param {
        ConstructParam::Int(_) => ParamKind::Int,
        ConstructParam::Float(_) => ParamKind::Float,
        ConstructParam::Bool(_) => ParamKind::Bool,
        ConstructParam::Str(_) => ParamKind::Str,
        ConstructParam::Ident(_) => ParamKind::Ident,
        ConstructParam::List(_) => ParamKind::List,
    }
}

/// Folds `-0.0` onto `0.0`; `None` if a NaN is found at any depth.
fn normalize(param: &ConstructParam) -> Option<ConstructParam> {
    match param {
        ConstructParam::Float(value) if value.is_nan() => None,
        ConstructParam::Float(value) if *value == 0.0 => Some(ConstructParam::Float(0.0)),
        ConstructParam::List(items) => items
            .iter()
            .map(normalize)
            .collect::<Option<Vec<_>>>()
            .map(ConstructParam::List),
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_zero_folds_onto_zero() {
        let normalized = normalize(&ConstructParam::Float(-0.0)).expect("finite");
        let bytes = canonical_bytes(&normalized).expect("encode");
        let zero = canonical_bytes(&ConstructParam::Float(0.0)).expect("encode");
        assert_eq!(bytes, zero);
    }

    #[test]
    fn nested_nan_is_rejected() {
        let param = ConstructParam::List(vec![
            ConstructParam::Int(1),
            ConstructParam::List(vec![ConstructParam::Float(f64::NAN)]),
        ]);
        assert!(normalize(&param).is_none());
    }
}
