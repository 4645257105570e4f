//! Graph IR handed over by the frontend.
//!
//! The graph is already legalized and topologically ordered; this crate only reads it. Tensors
//! are identified by name, operators by their position in `operators`.

mod ir;
mod types;

pub use ir::{Graph, GraphBuilder, GraphError, GraphIoError, GraphSerdeError, OpNode};
pub use types::{
    ConstantData, ConstructParam, DType, QuantParams, TensorInfo, TensorRole, TypeSignature,
};
