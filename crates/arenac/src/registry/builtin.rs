use super::ParamKind::{Ident, Int, List};
use super::TypeSlot::{Input, Output};
use super::{OperatorDescriptor, ParamKind, TypeSlot};

/// Header declaring the reference runtime's context, tensors and operators.
pub const DEFAULT_HEADER: &str = "uTensor.h";

const REFERENCE: &str = "ReferenceOperators";
const SYM_QUANT: &str = "TflmSymQuantOps";

fn op(
    op_type: &str,
    namespace: &str,
    class_name: &str,
    ports: (&[&str], &[&str]),
    params: &[ParamKind],
    template: &[TypeSlot],
) -> OperatorDescriptor {
    OperatorDescriptor::new(op_type, namespace, class_name)
        .ports(ports.0, ports.1)
        .params(params)
        .template(template)
}

/// Descriptors of the operator set shipped with the reference runtime.
pub fn builtin_descriptors() -> Vec<OperatorDescriptor> {
    const UNARY: (&[&str], &[&str]) = (&["in"], &["out"]);
    const IO: (&[&str], &[&str]) = (&["input"], &["output"]);
    const BINARY: (&[&str], &[&str]) = (&["a", "b"], &["c"]);
    const POOL: &[ParamKind] = &[List, List, Int];

    vec![
        op("Add", REFERENCE, "AddOperator", BINARY, &[], &[Input(0)]),
        op("MatrixMultiply", REFERENCE, "MatrixMultOperator", BINARY, &[], &[Input(0)]),
        op("ReLU", REFERENCE, "ReLUOperator", UNARY, &[], &[Input(0)]),
        op("ReLU6", REFERENCE, "ReLU6Operator", UNARY, &[], &[Input(0)]),
        op("Min", REFERENCE, "MinOperator", UNARY, &[], &[Input(0)]),
        op("Max", REFERENCE, "MaxOperator", UNARY, &[], &[Input(0)]),
        op("MinPool", REFERENCE, "MinPoolOperator", UNARY, POOL, &[Input(0)]),
        op("MaxPool", REFERENCE, "MaxPoolOperator", UNARY, POOL, &[Input(0)]),
        op("ArgMax", REFERENCE, "ArgMaxOperator", IO, &[], &[Input(0)]),
        op("ArgMin", REFERENCE, "ArgMinOperator", IO, &[], &[Input(0)]),
        op("Reshape", REFERENCE, "ReshapeOperator", IO, &[List], &[Input(0)]),
        op(
            "DepthwiseSeparableConvolution",
            REFERENCE,
            "DepthwiseSeparableConvOperator",
            (&["in", "depthwise_filter", "pointwise_filter"], &["out"]),
            &[List, Int],
            &[Input(0)],
        ),
        op(
            "FullyConnected",
            REFERENCE,
            "FullyConnectedOperator",
            (&["input", "filter", "bias"], &["output"]),
            &[Ident],
            &[Output(0)],
        ),
        op(
            "Quantize",
            SYM_QUANT,
            "QuantizeOperator",
            IO,
            &[],
            &[Input(0), Output(0)],
        ),
        op(
            "Dequantize",
            SYM_QUANT,
            "DequantizeOperator",
            (&["a"], &["b"]),
            &[],
            &[Output(0), Input(0)],
        ),
        op(
            "QuantizedFullyConnected",
            SYM_QUANT,
            "FullyConnectedOperator",
            (&["input", "filter", "bias"], &["output"]),
            &[Ident],
            &[Output(0)],
        ),
        op(
            "QuantizedDepthwiseSeparableConvolution",
            SYM_QUANT,
            "DepthwiseSeparableConvOperator",
            (&["in", "filter", "bias"], &["out"]),
            &[List, Int, Int, Ident],
            &[Output(0)],
        ),
    ]
}
