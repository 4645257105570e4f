use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::codegen::ExecutionOrder;
use crate::graph::{Graph, TensorRole};

use super::liveness::{LiveRange, Liveness, TensorLiveness};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOptions {
    /// Upper bound on the arena; `None` lets it grow to the peak.
    pub arena_limit: Option<usize>,
    /// Every slot address and size is a multiple of this power of two.
    pub alignment: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            arena_limit: None,
            alignment: 4,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error(
        "allocating {requested} bytes for tensor '{tensor}' needs an arena of {required} bytes, \
         limit is {limit} ({live_bytes} bytes live: {})",
        live.join(", ")
    )]
    ArenaOverflow {
        tensor: String,
        requested: usize,
        required: usize,
        limit: usize,
        /// Summed slot sizes of the tensors in `live`.
        live_bytes: usize,
        live: Vec<String>,
    },
    #[error("byte size of tensor '{tensor}' overflows")]
    SizeOverflow { tensor: String },
    #[error("tensor '{tensor}' was never analyzed")]
    MissingLiveness { tensor: String },
    #[error("tensors '{first}' and '{second}' are live together in overlapping slots")]
    Overlap { first: String, second: String },
}

/// Where a tensor lives for the program's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// `[offset, offset + size)` inside the arena.
    Arena { offset: usize, size: usize },
    /// Read-only storage outside the arena (weights).
    Rom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub role: TensorRole,
    pub placement: Placement,
    /// Initial refcount the runtime registers the tensor with.
    pub refcount: usize,
    pub range: LiveRange,
    /// Latest execution step whose release handed (part of) this slot over.
    pub available_after: Option<usize>,
    /// Execution step after which the planner frees the slot; `None` if never freed.
    pub released_after: Option<usize>,
}

impl PlanEntry {
    pub fn offset(&self) -> Option<usize> {
        match self.placement {
            Placement::Arena { offset, .. } => Some(offset),
            Placement::Rom => None,
        }
    }

    pub fn extent(&self) -> Option<(usize, usize)> {
        match self.placement {
            Placement::Arena { offset, size } => Some((offset, offset + size)),
            Placement::Rom => None,
        }
    }
}

/// Address and refcount assignment for every tensor of a graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryPlan {
    pub entries: Vec<PlanEntry>,
    pub arena_size: usize,
    pub alignment: usize,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl MemoryPlan {
    pub fn entry(&self, name: &str) -> Option<&PlanEntry> {
        self.index.get(name).map(|idx| &self.entries[*idx])
    }

    /// Largest sum of simultaneously live slot sizes over all positions.
    pub fn peak_bytes(&self) -> usize {
        let last = self
            .entries
            .iter()
            .map(|entry| entry.range.end)
            .max()
            .unwrap_or(0);
        (0..=last)
            .map(|pos| {
                self.entries
                    .iter()
                    .filter(|entry| entry.range.start <= pos && pos <= entry.range.end)
                    .filter_map(|entry| match entry.placement {
                        Placement::Arena { size, .. } => Some(size),
                        Placement::Rom => None,
                    })
                    .sum::<usize>()
            })
            .max()
            .unwrap_or(0)
    }

    /// Returns the first pair of tensors whose live ranges and arena extents both overlap.
    pub fn find_conflict(&self) -> Option<(&PlanEntry, &PlanEntry)> {
        for (i, a) in self.entries.iter().enumerate() {
            let Some((a_lo, a_hi)) = a.extent() else {
                continue;
            };
            if a_lo == a_hi {
                continue;
            }
            for b in &self.entries[i + 1..] {
                let Some((b_lo, b_hi)) = b.extent() else {
                    continue;
                };
                if b_lo == b_hi {
                    continue;
                }
                if a.range.overlaps(&b.range) && a_lo < b_hi && b_lo < a_hi {
                    return Some((a, b));
                }
            }
        }
        None
    }

    pub fn verify_disjoint(&self) -> Result<(), AllocationError> {
        match self.find_conflict() {
            Some((a, b)) => Err(AllocationError::Overlap {
                first: a.name.clone(),
                second: b.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Free arena ranges keyed by offset; adjacent ranges are always coalesced.
#[derive(Debug, Default)]
struct FreeList {
    ranges: BTreeMap<usize, FreeRange>,
}

#[derive(Debug, Clone, Copy)]
struct FreeRange {
    size: usize,
    /// Latest execution step whose release contributed to this range.
    freed_after: Option<usize>,
}

impl FreeList {
    /// Lowest-address range that fits. Ranges never share an offset, so there is no tie to
    /// break between equally placed candidates.
    fn take_first_fit(&mut self, size: usize) -> Option<(usize, Option<usize>)> {
        let (&offset, &range) = self
            .ranges
            .iter()
            .find(|(_, range)| range.size >= size)?;
        self.ranges.remove(&offset);
        if range.size > size {
            self.ranges.insert(
                offset + size,
                FreeRange {
                    size: range.size - size,
                    freed_after: range.freed_after,
                },
            );
        }
        Some((offset, range.freed_after))
    }

    /// Removes the free range ending at the arena end, so the arena can grow in place.
    fn take_tail(&mut self, arena_end: usize) -> Option<(usize, FreeRange)> {
        let (&offset, &range) = self.ranges.iter().next_back()?;
        if offset + range.size != arena_end {
            return None;
        }
        self.ranges.remove(&offset);
        Some((offset, range))
    }

    fn release(&mut self, offset: usize, size: usize, step: usize) {
        if size == 0 {
            return;
        }
        let mut start = offset;
        let mut end = offset + size;
        let mut freed_after = Some(step);
        if let Some((&prev_off, &prev)) = self.ranges.range(..offset).next_back() {
            if prev_off + prev.size == offset {
                self.ranges.remove(&prev_off);
                start = prev_off;
                freed_after = max_step(freed_after, prev.freed_after);
            }
        }
        if let Some(next) = self.ranges.remove(&end) {
            end += next.size;
            freed_after = max_step(freed_after, next.freed_after);
        }
        self.ranges.insert(
            start,
            FreeRange {
                size: end - start,
                freed_after,
            },
        );
    }
}

fn max_step(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn align_up(value: usize, alignment: usize) -> Option<usize> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

struct Planner<'a> {
    graph: &'a Graph,
    liveness: &'a Liveness,
    options: &'a MemoryOptions,
    alignment: usize,
    free: FreeList,
    arena_end: usize,
    /// Arena tensors currently holding a slot with their slot sizes, in allocation order.
    live: Vec<(String, usize)>,
    entries: Vec<Option<PlanEntry>>,
}

impl Planner<'_> {
    fn place(&mut self, idx: usize) -> Result<(), AllocationError> {
        let graph = self.graph;
        let tensor = &graph.tensors[idx];
        let info = liveness_of(self.liveness, &tensor.name)?;
        let (placement, available_after) = if info.role == TensorRole::Constant {
            (Placement::Rom, None)
        } else {
            let size = tensor
                .byte_len()
                .and_then(|len| align_up(len, self.alignment))
                .ok_or_else(|| AllocationError::SizeOverflow {
                    tensor: tensor.name.clone(),
                })?;
            let (offset, available_after) = self.allocate(&tensor.name, size)?;
            (Placement::Arena { offset, size }, available_after)
        };
        tracing::debug!(
            tensor = %tensor.name,
            ?placement,
            refcount = info.refcount,
            "placed"
        );
        self.entries[idx] = Some(PlanEntry {
            name: tensor.name.clone(),
            role: info.role,
            placement,
            refcount: info.refcount,
            range: info.range,
            available_after,
            released_after: None,
        });
        Ok(())
    }

    fn allocate(
        &mut self,
        tensor: &str,
        size: usize,
    ) -> Result<(usize, Option<usize>), AllocationError> {
        if let Some(found) = self.free.take_first_fit(size) {
            self.live.push((tensor.to_string(), size));
            return Ok(found);
        }
        let tail = self.free.take_tail(self.arena_end);
        let (offset, freed_after) = match tail {
            Some((offset, range)) => (offset, range.freed_after),
            None => (self.arena_end, None),
        };
        let required = offset
            .checked_add(size)
            .ok_or_else(|| AllocationError::SizeOverflow {
                tensor: tensor.to_string(),
            })?;
        if let Some(limit) = self.options.arena_limit {
            if required > limit {
                let live_bytes = self.live.iter().map(|(_, size)| size).sum();
                let mut live: Vec<String> =
                    self.live.iter().map(|(name, _)| name.clone()).collect();
                live.sort();
                return Err(AllocationError::ArenaOverflow {
                    tensor: tensor.to_string(),
                    requested: size,
                    required,
                    limit,
                    live_bytes,
                    live,
                });
            }
        }
        self.arena_end = self.arena_end.max(required);
        self.live.push((tensor.to_string(), size));
        Ok((offset, freed_after))
    }

    fn release(&mut self, idx: usize, step: usize) {
        let Some(entry) = self.entries[idx].as_mut() else {
            return;
        };
        entry.released_after = Some(step);
        if let Placement::Arena { offset, size } = entry.placement {
            tracing::trace!(tensor = %entry.name, offset, size, step, "released");
            self.live.retain(|(name, _)| *name != entry.name);
            self.free.release(offset, size, step);
        }
    }
}

/// Assigns every tensor an arena slot (or read-only placement) and its initial refcount.
///
/// Replays the execution order exactly as the runtime will: the outputs of step `i` are
/// allocated, then every input whose remaining consumer count drops to zero is released unless
/// it is a graph output. Dead results are released right after their producer.
pub fn plan_memory(
    graph: &Graph,
    order: &ExecutionOrder,
    liveness: &Liveness,
    options: &MemoryOptions,
) -> Result<MemoryPlan, AllocationError> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(graph.tensors.len());
    let mut remaining: Vec<usize> = Vec::with_capacity(graph.tensors.len());
    for (idx, tensor) in graph.tensors.iter().enumerate() {
        index.insert(tensor.name.clone(), idx);
        remaining.push(liveness_of(liveness, &tensor.name)?.consumers.len());
    }

    let mut planner = Planner {
        graph,
        liveness,
        options,
        alignment: options.alignment.max(1),
        free: FreeList::default(),
        arena_end: 0,
        live: Vec::new(),
        entries: vec![None; graph.tensors.len()],
    };

    // Program entry: inputs and constants, in declaration order.
    for (idx, tensor) in graph.tensors.iter().enumerate() {
        if liveness_of(liveness, &tensor.name)?.role != TensorRole::Intermediate {
            planner.place(idx)?;
        }
    }

    for (step, op_index) in order.iter().enumerate() {
        let op = &graph.operators[op_index];
        for name in &op.outputs {
            planner.place(index[name.as_str()])?;
        }

        let mut seen: Vec<usize> = Vec::with_capacity(op.inputs.len());
        for name in &op.inputs {
            let idx = index[name.as_str()];
            if seen.contains(&idx) {
                continue;
            }
            seen.push(idx);
            remaining[idx] = remaining[idx].saturating_sub(1);
            if remaining[idx] == 0 && !graph.is_output(name) {
                planner.release(idx, step);
            }
        }
        for name in &op.outputs {
            let idx = index[name.as_str()];
            if remaining[idx] == 0 && !graph.is_output(name) {
                planner.release(idx, step);
            }
        }
    }

    let arena_size = planner.arena_end;
    let alignment = planner.alignment;
    let entries: Vec<PlanEntry> = planner
        .entries
        .into_iter()
        .zip(graph.tensors.iter())
        .map(|(entry, tensor)| {
            entry.ok_or_else(|| AllocationError::MissingLiveness {
                tensor: tensor.name.clone(),
            })
        })
        .collect::<Result<_, _>>()?;

    tracing::info!(
        graph = %graph.name,
        tensors = entries.len(),
        arena_bytes = arena_size,
        "memory plan complete"
    );

    Ok(MemoryPlan {
        entries,
        arena_size,
        alignment,
        index,
    })
}

fn liveness_of<'a>(
    liveness: &'a Liveness,
    name: &str,
) -> Result<&'a TensorLiveness, AllocationError> {
    liveness
        .get(name)
        .ok_or_else(|| AllocationError::MissingLiveness {
            tensor: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_coalesces_neighbours() {
        let mut free = FreeList::default();
        free.release(0, 8, 0);
        free.release(16, 8, 2);
        free.release(8, 8, 1);
        assert_eq!(free.ranges.len(), 1);
        let range = free.ranges[&0];
        assert_eq!(range.size, 24);
        assert_eq!(range.freed_after, Some(2));
    }

    #[test]
    fn first_fit_prefers_lowest_address() {
        let mut free = FreeList::default();
        free.release(32, 16, 0);
        free.release(0, 16, 1);
        assert_eq!(free.take_first_fit(8), Some((0, Some(1))));
        assert_eq!(free.take_first_fit(8), Some((8, Some(1))));
        assert_eq!(free.take_first_fit(16), Some((32, Some(0))));
        assert_eq!(free.take_first_fit(4), None);
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 4), Some(0));
        assert_eq!(align_up(5, 4), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(usize::MAX, 4), None);
    }
}
