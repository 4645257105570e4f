//! Static planning passes: liveness, arena placement and operator deduplication.

pub mod dedup;
pub mod liveness;
pub mod memory;

pub use dedup::{
    deduplicate, dedup_key, DedupError, DedupKey, InstanceId, InstanceTable, OperatorInstance,
};
pub use liveness::{analyze, LiveRange, Liveness, LivenessError, TensorLiveness, ENTRY};
pub use memory::{plan_memory, AllocationError, MemoryOptions, MemoryPlan, PlanEntry, Placement};
