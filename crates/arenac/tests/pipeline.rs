use arenac::codegen::{EmissionPolicy, EmitStep};
use arenac::graph::{ConstantData, DType, Graph, GraphBuilder, GraphError, TensorInfo};
use arenac::plan::AllocationError;
use arenac::runtime::Event;
use arenac::{compile, replay, CodegenConfig, CompileError, ConfigError, OperatorRegistry};
use tempfile::tempdir;

fn f32_tensor(name: &str, len: usize) -> TensorInfo {
    TensorInfo::new(name, DType::F32, &[len])
}

/// Small classifier head: dense -> relu -> dense -> argmax, with one skip branch.
fn classifier() -> Graph {
    let mut builder = GraphBuilder::new("classifier");
    let x = builder.add_input("x", DType::F32, &[1, 8]);
    let w0 = builder.add_constant(
        TensorInfo::new("w0", DType::F32, &[8, 8]).with_data(ConstantData::Float(vec![0.1; 64])),
    );
    let w1 = builder.add_constant(
        TensorInfo::new("w1", DType::F32, &[8, 4]).with_data(ConstantData::Float(vec![0.2; 32])),
    );
    let row = |name: &str, width: usize| TensorInfo::new(name, DType::F32, &[1, width]);
    builder.emit("MatrixMultiply", &[&x, &w0], vec![row("h0", 8)]);
    builder.emit("ReLU", &["h0"], vec![row("h1", 8)]);
    builder.emit("Add", &["h1", &x], vec![row("h2", 8)]);
    builder.emit("MatrixMultiply", &["h2", &w1], vec![row("logits", 4)]);
    builder.emit(
        "ArgMax",
        &["logits"],
        vec![TensorInfo::new("label", DType::Si32, &[1])],
    );
    builder.mark_output("logits");
    builder.mark_output("label");
    builder.finish()
}

fn executed(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Executed { op } => Some(op.clone()),
            _ => None,
        })
        .collect()
}

fn released(events: &[Event]) -> Vec<String> {
    let mut names: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            Event::Released { name } => Some(name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}

#[test]
fn classifier_compiles_end_to_end() {
    let graph = classifier();
    let model = compile(
        &graph,
        &OperatorRegistry::with_builtins(),
        &CodegenConfig::default(),
    )
    .expect("compile classifier");

    assert_eq!(model.model_name, "classifier");
    assert_eq!(model.instances.len(), 4, "both matmuls share one instance");
    assert!(model.plan.arena_size >= model.plan.peak_bytes());
    model.plan.verify_disjoint().expect("disjoint plan");
    assert_eq!(model.report.arena_size, model.plan.arena_size);
    assert_eq!(model.report.tensors.len(), graph.tensors.len());

    let x = model.plan.entry("x").expect("x");
    assert_eq!(x.refcount, 2);
    assert_eq!(x.released_after, Some(2));
    assert_eq!(model.plan.entry("logits").expect("logits").refcount, 2);
    assert_eq!(model.plan.entry("label").expect("label").released_after, None);

    assert!(model
        .source
        .contains("static ReferenceOperators::MatrixMultOperator<float> op_matrixmultiply_000;"));
    assert!(model
        .source
        .contains("static ReferenceOperators::ArgMaxOperator<float> op_argmax_003;"));
    assert!(model.source.contains(r#"ctx.add(new RamTensor<int32_t>({1}, "#));
}

#[test]
fn eager_and_lazy_replay_identically() {
    let graph = classifier();
    let registry = OperatorRegistry::with_builtins();
    let lazy = compile(&graph, &registry, &CodegenConfig::default()).expect("lazy");
    let eager_config = CodegenConfig {
        emission: EmissionPolicy::Eager,
        ..CodegenConfig::default()
    };
    let eager = compile(&graph, &registry, &eager_config).expect("eager");

    let lazy_ctx = replay(&graph, &lazy.plan, &lazy.instances, &lazy.steps).expect("lazy replay");
    let eager_ctx =
        replay(&graph, &eager.plan, &eager.instances, &eager.steps).expect("eager replay");
    assert_eq!(executed(lazy_ctx.events()), executed(eager_ctx.events()));
    assert_eq!(released(lazy_ctx.events()), released(eager_ctx.events()));
    assert_eq!(lazy.plan.entries, eager.plan.entries);

    let flushes = |steps: &[EmitStep]| steps.iter().filter(|s| **s == EmitStep::Flush).count();
    assert_eq!(flushes(&eager.steps), graph.operators.len());
    assert!(flushes(&lazy.steps) <= flushes(&eager.steps));
}

#[test]
fn compilation_is_deterministic() {
    let graph = classifier();
    let registry = OperatorRegistry::with_builtins();
    let first = compile(&graph, &registry, &CodegenConfig::default()).expect("first");
    let second = compile(&graph, &registry, &CodegenConfig::default()).expect("second");
    assert_eq!(first.source, second.source);
    assert_eq!(first.steps, second.steps);
}

#[test]
fn arena_limit_fails_without_output() {
    let config = CodegenConfig {
        arena_limit: Some(40),
        ..CodegenConfig::default()
    };
    let err = compile(&classifier(), &OperatorRegistry::with_builtins(), &config).unwrap_err();
    assert_eq!(err.stage(), "plan");
    match err {
        CompileError::Allocation(AllocationError::ArenaOverflow { tensor, limit, .. }) => {
            assert_eq!(tensor, "h0");
            assert_eq!(limit, 40);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn invalid_config_is_rejected_first() {
    let config = CodegenConfig {
        alignment: 3,
        ..CodegenConfig::default()
    };
    let err = compile(&classifier(), &OperatorRegistry::with_builtins(), &config).unwrap_err();
    assert!(matches!(err, CompileError::Config(ConfigError::InvalidAlignment(3))));
    assert_eq!(err.stage(), "config");
}

#[test]
fn constant_payload_must_match_shape() {
    let mut builder = GraphBuilder::new("short_weights");
    let x = builder.add_input("x", DType::F32, &[4]);
    let w = builder.add_constant(
        f32_tensor("w", 4).with_data(ConstantData::Float(vec![1.0, 2.0])),
    );
    builder.emit("Add", &[&x, &w], vec![f32_tensor("y", 4)]);
    builder.mark_output("y");

    let err = compile(
        &builder.finish(),
        &OperatorRegistry::with_builtins(),
        &CodegenConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Graph(GraphError::ConstantLength { expected: 4, found: 2, .. })
    ));
}

fn compile_err(graph: &Graph) -> CompileError {
    compile(
        graph,
        &OperatorRegistry::with_builtins(),
        &CodegenConfig::default(),
    )
    .unwrap_err()
}

#[test]
fn float_payload_on_integer_constant_is_rejected() {
    let mut builder = GraphBuilder::new("int_weights");
    let x = builder.add_input("x", DType::Si8, &[2]);
    let w = builder.add_constant(
        TensorInfo::new("w", DType::Si8, &[2]).with_data(ConstantData::Float(vec![0.5, 1.5])),
    );
    builder.emit("Add", &[&x, &w], vec![TensorInfo::new("y", DType::Si8, &[2])]);
    builder.mark_output("y");

    let err = compile_err(&builder.finish());
    assert_eq!(err.stage(), "validate");
    assert_eq!(
        err.to_string(),
        "graph validation failed: constant 'w' holds float values but is declared Si8"
    );
}

#[test]
fn integer_constant_must_fit_its_kind() {
    let mut builder = GraphBuilder::new("wide_weights");
    let x = builder.add_input("x", DType::Ui8, &[3]);
    let w = builder.add_constant(
        TensorInfo::new("w", DType::Ui8, &[3]).with_data(ConstantData::Int(vec![0, 255, 256])),
    );
    builder.emit("Add", &[&x, &w], vec![TensorInfo::new("y", DType::Ui8, &[3])]);
    builder.mark_output("y");

    match compile_err(&builder.finish()) {
        CompileError::Graph(GraphError::ConstantRange { name, dtype, value }) => {
            assert_eq!(name, "w");
            assert_eq!(dtype, DType::Ui8);
            assert_eq!(value, 256);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn quantized_float_tensor_is_rejected() {
    let mut builder = GraphBuilder::new("float_quant");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit(
        "ReLU",
        &[&x],
        vec![TensorInfo::new("a", DType::F32, &[4]).with_quant(0.5, 3)],
    );
    builder.mark_output("a");

    let err = compile_err(&builder.finish());
    assert!(err.to_string().contains("'a'"), "{err}");
    assert!(matches!(
        err,
        CompileError::Graph(GraphError::QuantizedNonInteger { dtype: DType::F32, .. })
    ));
}

#[test]
fn unsupported_operator_surfaces_dedup_stage() {
    let mut builder = GraphBuilder::new("custom");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit("Softmax", &[&x], vec![f32_tensor("y", 4)]);
    builder.mark_output("y");

    let err = compile(
        &builder.finish(),
        &OperatorRegistry::with_builtins(),
        &CodegenConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err.stage(), "dedup");
    assert!(err.to_string().contains("#0 Softmax"));
}

#[test]
fn graph_json_round_trips_through_file() -> anyhow::Result<()> {
    let graph = classifier();
    let dir = tempdir()?;
    let path = dir.path().join("classifier.json");
    graph.save_json(&path)?;
    let loaded = Graph::load_json(&path)?;
    assert_eq!(loaded, graph);
    assert_eq!(loaded.fingerprint()?, graph.fingerprint()?);

    let registry = OperatorRegistry::with_builtins();
    let config = CodegenConfig::default();
    assert_eq!(
        compile(&loaded, &registry, &config)?.source,
        compile(&graph, &registry, &config)?.source
    );
    Ok(())
}

#[test]
fn plan_report_serializes_placements() -> anyhow::Result<()> {
    let model = compile(
        &classifier(),
        &OperatorRegistry::with_builtins(),
        &CodegenConfig::default(),
    )?;
    let json: serde_json::Value = serde_json::from_str(&model.report.to_json_string()?)?;
    assert_eq!(json["graph"], "classifier");
    assert_eq!(json["arena_size"], model.plan.arena_size);
    let w0 = json["tensors"]
        .as_array()
        .and_then(|tensors| tensors.iter().find(|t| t["name"] == "w0"))
        .expect("w0 in report");
    assert_eq!(w0["placement"], "rom");
    assert_eq!(w0["role"], "constant");
    let x = json["tensors"]
        .as_array()
        .and_then(|tensors| tensors.iter().find(|t| t["name"] == "x"))
        .expect("x in report");
    assert_eq!(x["placement"]["arena"]["offset"], 0);
    Ok(())
}
