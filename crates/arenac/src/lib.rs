//! Static arena planning and deferred-evaluation code generation for frozen NN graphs.
//!
//! `arenac` takes a topologically ordered operator graph, computes tensor lifetimes, places
//! every tensor at a fixed offset inside one bounded arena, collapses identical operator
//! configurations onto shared instances, and emits a C++ program that drives a refcounting
//! evaluation context. The plan is replayed through [`runtime::EvalContext`] before any code is
//! rendered.

pub mod codegen;
pub mod config;
pub mod graph;
pub mod hashing;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod runtime;

pub use config::{CodegenConfig, ConfigError};
pub use graph::{Graph, GraphBuilder, OpNode};
pub use pipeline::{compile, replay, CompileError, CompiledModel, PlanReport};
pub use registry::OperatorRegistry;
