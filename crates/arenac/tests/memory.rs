use arenac::codegen::ExecutionOrder;
use arenac::graph::{ConstantData, DType, Graph, GraphBuilder, OpNode, TensorInfo};
use arenac::plan::{
    analyze, plan_memory, AllocationError, MemoryOptions, MemoryPlan, Placement, PlanEntry,
};

fn f32_tensor(name: &str, len: usize) -> TensorInfo {
    TensorInfo::new(name, DType::F32, &[len])
}

fn plan_with(graph: &Graph, options: &MemoryOptions) -> Result<MemoryPlan, AllocationError> {
    let order = ExecutionOrder::of(graph);
    let liveness = analyze(graph, &order).expect("liveness");
    plan_memory(graph, &order, &liveness, options)
}

fn plan(graph: &Graph) -> MemoryPlan {
    let plan = plan_with(graph, &MemoryOptions::default()).expect("memory plan");
    plan.verify_disjoint().expect("disjoint slots");
    plan
}

fn entry<'a>(plan: &'a MemoryPlan, name: &str) -> &'a PlanEntry {
    plan.entry(name)
        .unwrap_or_else(|| panic!("plan entry missing for {name}"))
}

fn chain() -> Graph {
    let mut builder = GraphBuilder::new("chain");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit("ReLU", &[&x], vec![f32_tensor("a", 4)]);
    builder.emit("ReLU", &["a"], vec![f32_tensor("b", 4)]);
    builder.emit("ReLU", &["b"], vec![f32_tensor("c", 4)]);
    builder.mark_output("c");
    builder.finish()
}

#[test]
fn chain_releases_after_last_consumer() {
    let plan = plan(&chain());

    let x = entry(&plan, "x");
    assert_eq!(x.placement, Placement::Arena { offset: 0, size: 16 });
    assert_eq!(x.released_after, Some(0));

    let a = entry(&plan, "a");
    assert_eq!(a.refcount, 1);
    assert_eq!(a.offset(), Some(16));
    assert_eq!(a.released_after, Some(1));

    // b lands in the range x vacated after step 0.
    let b = entry(&plan, "b");
    assert_eq!(b.offset(), Some(0));
    assert_eq!(b.available_after, Some(0));

    let c = entry(&plan, "c");
    assert_eq!(c.refcount, 1);
    assert_eq!(c.released_after, None, "graph outputs are never freed");
    assert_eq!(c.offset(), Some(16));
    assert_eq!(c.available_after, Some(1));

    assert_eq!(plan.arena_size, 32);
    assert_eq!(plan.peak_bytes(), 32);
}

#[test]
fn shared_tensor_is_freed_after_both_siblings() {
    let mut builder = GraphBuilder::new("siblings");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit("ReLU", &[&x], vec![f32_tensor("a", 4)]);
    builder.emit("ReLU", &["a"], vec![f32_tensor("b", 4)]);
    builder.emit("ReLU6", &["a"], vec![f32_tensor("c", 4)]);
    builder.emit("Add", &["b", "c"], vec![f32_tensor("d", 4)]);
    builder.mark_output("d");
    let plan = plan(&builder.finish());

    let a = entry(&plan, "a");
    assert_eq!(a.refcount, 2);
    assert_eq!(a.released_after, Some(2));
    // c cannot reuse a's slot: a is still live while step 2 allocates.
    assert_ne!(entry(&plan, "c").offset(), a.offset());
    assert_eq!(entry(&plan, "d").offset(), a.offset());
    assert_eq!(plan.arena_size, 48);
}

#[test]
fn arena_limit_names_the_failing_tensor() {
    let options = MemoryOptions {
        arena_limit: Some(24),
        ..MemoryOptions::default()
    };
    let err = plan_with(&chain(), &options).unwrap_err();
    assert_eq!(
        err,
        AllocationError::ArenaOverflow {
            tensor: "a".to_string(),
            requested: 16,
            required: 32,
            limit: 24,
            live_bytes: 16,
            live: vec!["x".to_string()],
        }
    );
}

#[test]
fn arena_overflow_reports_live_bytes_apart_from_fragmentation() {
    let mut builder = GraphBuilder::new("fragmented");
    let x = builder.add_input("x", DType::F32, &[4]);
    let y = builder.add_input("y", DType::F32, &[4]);
    builder.emit("ReLU", &[&x], vec![f32_tensor("a", 4)]);
    builder.emit("Concat", &["a", &y], vec![f32_tensor("b", 8)]);
    builder.mark_output("b");
    let options = MemoryOptions {
        arena_limit: Some(64),
        ..MemoryOptions::default()
    };

    // x's 16-byte hole at offset 0 is too small for b, which must go past the end at 48.
    match plan_with(&builder.finish(), &options).unwrap_err() {
        AllocationError::ArenaOverflow {
            tensor,
            required,
            live_bytes,
            live,
            ..
        } => {
            assert_eq!(tensor, "b");
            assert_eq!(required, 80);
            assert_eq!(live_bytes, 32);
            assert_eq!(live, vec!["a".to_string(), "y".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn exact_limit_is_accepted() {
    let options = MemoryOptions {
        arena_limit: Some(32),
        ..MemoryOptions::default()
    };
    let plan = plan_with(&chain(), &options).expect("plan fits");
    assert_eq!(plan.arena_size, 32);
}

#[test]
fn passthrough_input_is_never_freed() {
    let mut builder = GraphBuilder::new("passthrough");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit("ReLU", &[&x], vec![f32_tensor("y", 4)]);
    builder.mark_output("x");
    builder.mark_output("y");
    let plan = plan(&builder.finish());

    let x = entry(&plan, "x");
    assert_eq!(x.refcount, 2);
    assert_eq!(x.released_after, None);
    assert_eq!(x.range.start, 0);
}

#[test]
fn zero_output_operator_still_releases_inputs() {
    let mut builder = GraphBuilder::new("sink");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit("ReLU", &[&x], vec![f32_tensor("a", 4)]);
    builder.emit_node(OpNode::new("Sink", &["a"], &[]), Vec::new());
    let plan = plan(&builder.finish());

    assert_eq!(entry(&plan, "a").released_after, Some(1));
    assert_eq!(plan.arena_size, 32);
}

#[test]
fn dead_result_is_freed_right_after_its_producer() {
    let mut builder = GraphBuilder::new("split");
    let x = builder.add_input("x", DType::F32, &[8]);
    builder.emit("Split", &[&x], vec![f32_tensor("lo", 4), f32_tensor("hi", 4)]);
    builder.emit("ReLU", &["lo"], vec![f32_tensor("y", 4)]);
    builder.mark_output("y");
    let plan = plan(&builder.finish());

    let hi = entry(&plan, "hi");
    assert_eq!(hi.refcount, 0);
    assert_eq!(hi.released_after, Some(0));
    assert_eq!(entry(&plan, "y").available_after, Some(0));
}

#[test]
fn constants_live_outside_the_arena() {
    let mut builder = GraphBuilder::new("bias");
    let x = builder.add_input("x", DType::F32, &[4]);
    let w = builder.add_constant(
        f32_tensor("w", 4).with_data(ConstantData::Float(vec![1.0, 2.0, 3.0, 4.0])),
    );
    builder.emit("Add", &[&x, &w], vec![f32_tensor("y", 4)]);
    builder.mark_output("y");
    let plan = plan(&builder.finish());

    let w = entry(&plan, "w");
    assert_eq!(w.placement, Placement::Rom);
    assert_eq!(w.refcount, 1);
    assert_eq!(w.released_after, Some(0));
    assert_eq!(plan.arena_size, 32);
}

#[test]
fn slots_respect_alignment() {
    let mut builder = GraphBuilder::new("bytes");
    let x = builder.add_input("x", DType::Si8, &[3]);
    builder.emit("ReLU", &[&x], vec![TensorInfo::new("y", DType::Si8, &[5])]);
    builder.mark_output("y");
    let options = MemoryOptions {
        arena_limit: None,
        alignment: 8,
    };
    let plan = plan_with(&builder.finish(), &options).expect("plan");

    assert_eq!(
        entry(&plan, "x").placement,
        Placement::Arena { offset: 0, size: 8 }
    );
    assert_eq!(
        entry(&plan, "y").placement,
        Placement::Arena { offset: 8, size: 8 }
    );
    assert_eq!(plan.alignment, 8);
}

#[test]
fn arena_grows_through_trailing_free_range() {
    let mut builder = GraphBuilder::new("tail");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit("ReLU", &[&x], vec![f32_tensor("a", 2)]);
    builder.emit("ReLU", &["a"], vec![f32_tensor("b", 2)]);
    builder.emit("ReLU", &["b"], vec![f32_tensor("c", 8)]);
    builder.mark_output("c");
    let plan = plan(&builder.finish());

    assert_eq!(entry(&plan, "a").offset(), Some(16));
    assert_eq!(entry(&plan, "b").offset(), Some(0));
    // [8, 24) is free and touches the arena end, so c starts there instead of at 24.
    let c = entry(&plan, "c");
    assert_eq!(c.placement, Placement::Arena { offset: 8, size: 32 });
    assert_eq!(c.available_after, Some(1));
    assert_eq!(plan.arena_size, 40);
}

#[test]
fn oversized_shape_is_a_size_overflow() {
    let mut builder = GraphBuilder::new("huge");
    let x = builder.add_input("x", DType::F32, &[4]);
    builder.emit(
        "ReLU",
        &[&x],
        vec![TensorInfo::new("y", DType::F64, &[usize::MAX / 2, 3])],
    );
    builder.mark_output("y");

    let err = plan_with(&builder.finish(), &MemoryOptions::default()).unwrap_err();
    assert_eq!(
        err,
        AllocationError::SizeOverflow {
            tensor: "y".to_string()
        }
    );
}
