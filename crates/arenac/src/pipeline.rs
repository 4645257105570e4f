use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::codegen::{assemble, EmitError, EmitStep, ExecutionOrder, Renderer};
use crate::config::{CodegenConfig, ConfigError};
use crate::graph::{Graph, GraphError, GraphSerdeError, TensorRole};
use crate::plan::{
    analyze, deduplicate, plan_memory, AllocationError, DedupError, InstanceId, InstanceTable,
    LiveRange, Liveness, LivenessError, MemoryPlan, Placement,
};
use crate::registry::OperatorRegistry;
use crate::runtime::{EvalContext, NoopOperator, Operator, RuntimeError, Storage};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("graph validation failed: {0}")]
    Graph(#[from] GraphError),
    #[error("graph fingerprint failed: {0}")]
    Fingerprint(#[from] GraphSerdeError),
    #[error("liveness analysis failed: {0}")]
    Liveness(#[from] LivenessError),
    #[error("memory planning failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("operator deduplication failed: {0}")]
    Dedup(#[from] DedupError),
    #[error("emission failed: {0}")]
    Emit(#[from] EmitError),
    #[error("plan replay failed: {0}")]
    Replay(#[from] RuntimeError),
}

impl CompileError {
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Config(_) => "config",
            CompileError::Graph(_) | CompileError::Fingerprint(_) => "validate",
            CompileError::Liveness(_) => "liveness",
            CompileError::Allocation(_) => "plan",
            CompileError::Dedup(_) => "dedup",
            CompileError::Emit(_) => "assemble",
            CompileError::Replay(_) => "verify",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TensorReport {
    pub name: String,
    pub role: TensorRole,
    pub placement: Placement,
    pub refcount: usize,
    pub live_range: LiveRange,
    pub released_after: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub var: String,
    pub op_type: String,
    pub namespace: String,
    pub evaluations: usize,
}

/// Serializable summary of a compilation.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub graph: String,
    pub model_name: String,
    pub fingerprint: String,
    pub arena_size: usize,
    pub peak_bytes: usize,
    pub alignment: usize,
    pub flushes: usize,
    pub tensors: Vec<TensorReport>,
    pub instances: Vec<InstanceReport>,
}

impl PlanReport {
    fn new(
        graph: &Graph,
        model_name: String,
        fingerprint: u64,
        plan: &MemoryPlan,
        instances: &InstanceTable,
        steps: &[EmitStep],
    ) -> Self {
        Self {
            graph: graph.name.clone(),
            model_name,
            fingerprint: format!("{fingerprint:016x}"),
            arena_size: plan.arena_size,
            peak_bytes: plan.peak_bytes(),
            alignment: plan.alignment,
            flushes: steps.iter().filter(|step| **step == EmitStep::Flush).count(),
            tensors: plan
                .entries
                .iter()
                .map(|entry| TensorReport {
                    name: entry.name.clone(),
                    role: entry.role,
                    placement: entry.placement,
                    refcount: entry.refcount,
                    live_range: entry.range,
                    released_after: entry.released_after,
                })
                .collect(),
            instances: instances
                .instances
                .iter()
                .map(|instance| InstanceReport {
                    var: instance.var.clone(),
                    op_type: instance.key.op_type.clone(),
                    namespace: instance.key.namespace.clone(),
                    evaluations: instance.occurrences.len(),
                })
                .collect(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Every artifact produced for one graph.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub model_name: String,
    pub order: ExecutionOrder,
    pub liveness: Liveness,
    pub plan: MemoryPlan,
    pub instances: InstanceTable,
    pub steps: Vec<EmitStep>,
    pub source: String,
    pub report: PlanReport,
}

/// Runs every stage on `graph`; nothing is rendered unless planning and replay succeed.
pub fn compile(
    graph: &Graph,
    registry: &OperatorRegistry,
    config: &CodegenConfig,
) -> Result<CompiledModel, CompileError> {
    let span = tracing::info_span!("compile", graph = %graph.name);
    let _guard = span.enter();

    config.validate()?;
    graph.validate()?;
    let fingerprint = graph.fingerprint()?;

    let order = ExecutionOrder::of(graph);
    let liveness = tracing::debug_span!("liveness").in_scope(|| analyze(graph, &order))?;
    let plan = tracing::debug_span!("plan").in_scope(|| {
        plan_memory(graph, &order, &liveness, &config.memory_options())
    })?;
    plan.verify_disjoint()?;
    let instances =
        tracing::debug_span!("dedup").in_scope(|| deduplicate(graph, &order, registry))?;
    let steps = tracing::debug_span!("assemble").in_scope(|| {
        assemble(
            graph,
            &order,
            &plan,
            &instances,
            &config.assemble_options(),
        )
    })?;
    tracing::debug_span!("verify").in_scope(|| replay(graph, &plan, &instances, &steps))?;

    let renderer = Renderer {
        graph,
        plan: &plan,
        instances: &instances,
        registry,
        config,
        fingerprint,
    };
    let model_name = renderer.model_name();
    let source = renderer.render(&steps)?;
    let report = PlanReport::new(
        graph,
        model_name.clone(),
        fingerprint,
        &plan,
        &instances,
        &steps,
    );

    tracing::info!(
        model = %model_name,
        operators = order.len(),
        instances = instances.len(),
        arena_bytes = plan.arena_size,
        flushes = report.flushes,
        "compiled"
    );

    Ok(CompiledModel {
        model_name,
        order,
        liveness,
        plan,
        instances,
        steps,
        source,
        report,
    })
}

/// Executes the emission steps against an [`EvalContext`], exactly as the generated program
/// would, and returns the finished context.
pub fn replay(
    graph: &Graph,
    plan: &MemoryPlan,
    instances: &InstanceTable,
    steps: &[EmitStep],
) -> Result<EvalContext, CompileError> {
    let mut ctx = EvalContext::new();
    let mut operators: HashMap<InstanceId, Arc<dyn Operator>> = HashMap::new();

    for step in steps {
        match step {
            EmitStep::Declare { instance } => {
                let var = instances
                    .get(*instance)
                    .map(|instance| instance.var.clone())
                    .ok_or_else(|| EmitError::MissingInstance {
                        op: format!("instance {}", instance.0),
                    })?;
                operators.insert(*instance, Arc::new(NoopOperator::new(var)));
            }
            EmitStep::Construct { .. } => {}
            EmitStep::Register { tensor } => {
                let entry = plan.entry(tensor).ok_or_else(|| EmitError::MissingPlanEntry {
                    tensor: tensor.clone(),
                })?;
                let storage = match entry.placement {
                    Placement::Arena { offset, size } => Storage::Arena { offset, size },
                    Placement::Rom => Storage::Rom,
                };
                ctx.register(tensor, storage, entry.refcount)?;
            }
            EmitStep::Enqueue {
                op_index, instance, ..
            } => {
                let op = &graph.operators[*op_index];
                let operator = operators
                    .get(instance)
                    .cloned()
                    .ok_or_else(|| EmitError::MissingInstance {
                        op: op.describe(*op_index),
                    })?;
                let inputs: Vec<&str> = op.inputs.iter().map(String::as_str).collect();
                let outputs: Vec<&str> = op.outputs.iter().map(String::as_str).collect();
                ctx.enqueue(operator, &inputs, &outputs)?;
            }
            EmitStep::Flush => ctx.flush()?,
        }
    }

    let outputs: Vec<&str> = graph.outputs.iter().map(String::as_str).collect();
    ctx.finish(&outputs)?;
    tracing::debug!(events = ctx.events().len(), "replay finished cleanly");
    Ok(ctx)
}
