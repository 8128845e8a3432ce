//! Synchronization analysis: which writes need a barrier.
//!
//! Runs before block/thread filters are attached, on the tiled schedule.
//! A barrier is required after a write when a later access in the same
//! kernel invocation may touch the same element from a different thread of
//! the same block. Two cases produce that situation:
//!
//! 1. a flow dependence that stays inside one kernel invocation but crosses
//!    threads,
//! 2. two writes to the same element from the same block on different
//!    iterations of the intermediate band (the per-thread loop over tile
//!    elements).
//!
//! Dependences across blocks are not synchronizable at all and are out of
//! scope here; the device model has no inter-block barrier.

use crate::isl_ext;
use crate::scop::Scop;
use isl_rs::{Id, MultiUnionPwAff, Schedule, ScheduleNode, UnionAccessInfo, UnionMap, UnionSet};
use log::debug;

/// Name of the mark node placed where a barrier is needed.
pub const BARRIER_MARK: &str = "barrier";

/// Schedule prefixes used to qualify dependences, all in terms of original
/// statement instances.
pub struct SyncData {
    /// `{ S[i] -> [host] }`: coordinates identifying the kernel invocation.
    pub host_mupa: MultiUnionPwAff,

    /// `{ S[i] -> [host, block] }`.
    pub block_mupa: MultiUnionPwAff,

    /// `{ S[i] -> [host, block, thread] }`.
    pub thread_mupa: MultiUnionPwAff,

    /// `{ S[i] -> [host, block, inter] }` with `inter` the iteration of the
    /// intermediate band (which tile element round a thread is on).
    pub inter_mupa: MultiUnionPwAff,
}

/// Result of the analysis: the qualifying dependences and the write
/// references after which a barrier must be placed.
pub struct SyncSet {
    pub deps: UnionMap,
    pub writes: Vec<usize>,
}

impl SyncSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Computes the synchronization set for one kernel.
///
/// `core` are the statement instances of the kernel, `schedule` the tiled
/// schedule the dependences are ordered by. A barrier is attributed to a
/// write reference by re-qualifying the dependences with the sources
/// restricted to that reference alone, so a sibling write of the same
/// statement is not flagged along.
pub fn compute_sync(
    scop: &Scop,
    core: &UnionSet,
    schedule: &Schedule,
    data: &SyncData,
) -> SyncSet {
    let reads = scop.reads(core);
    let writes = scop.writes(core);
    let must_writes = scop.collect_accesses(core, |a| a.write && a.exact_write);

    let deps = isl_ext::union_map_union(
        cross_thread_flow(reads.copy(), must_writes, writes.copy(), schedule, data),
        cross_round_writes(writes.copy(), writes.copy(), data),
    );

    let mut sync_writes = Vec::new();
    if !deps.is_empty() {
        for (idx, acc) in scop.accesses.iter().enumerate() {
            if !acc.write {
                continue;
            }
            let from_ref = acc.access.copy().intersect_domain(core.copy());
            if from_ref.is_empty() {
                continue;
            }
            let must = if acc.exact_write {
                from_ref.copy()
            } else {
                UnionMap::read_from_str(&scop.ctx, "{ }")
            };
            let qualifying = isl_ext::union_map_union(
                cross_thread_flow(reads.copy(), must, from_ref.copy(), schedule, data),
                cross_round_writes(from_ref, writes.copy(), data),
            );
            if !qualifying.is_empty() {
                sync_writes.push(idx);
            }
        }
    }

    debug!(
        "synchronization: {} write reference(s) need a barrier",
        sync_writes.len()
    );
    SyncSet {
        deps,
        writes: sync_writes,
    }
}

/// Flow dependences ordered by the tiled schedule, confined to one kernel
/// invocation and crossing threads, with the sources restricted to the
/// given writes.
fn cross_thread_flow(
    sink: UnionMap,
    must_source: UnionMap,
    may_source: UnionMap,
    schedule: &Schedule,
    data: &SyncData,
) -> UnionMap {
    let flow = UnionAccessInfo::from_sink(sink)
        .set_must_source(must_source)
        .set_may_source(may_source)
        .set_schedule(schedule.copy())
        .compute_flow();
    let dep = isl_ext::union_map_union(flow.get_must_dependence(), flow.get_may_dependence());
    let dep = isl_ext::union_map_eq_at(dep, data.host_mupa.copy());
    let same_thread = isl_ext::union_map_eq_at(dep.copy(), data.thread_mupa.copy());
    isl_ext::union_map_subtract(dep, same_thread)
}

/// Same-element write pairs from the same block on different
/// intermediate-band iterations, with the first write drawn from `from`.
fn cross_round_writes(from: UnionMap, writes: UnionMap, data: &SyncData) -> UnionMap {
    let ww = from.apply_range(writes.reverse());
    let ww = isl_ext::union_map_eq_at(ww, data.block_mupa.copy());
    let same_round = isl_ext::union_map_eq_at(ww.copy(), data.inter_mupa.copy());
    isl_ext::union_map_subtract(ww, same_round)
}

/// Marks the position of a required barrier in the tree.
pub fn insert_barrier(node: ScheduleNode, ctx: &isl_rs::Context) -> ScheduleNode {
    node.insert_mark(Id::read_from_str(ctx, BARRIER_MARK))
}
