//! Array reference groups: classification, overlap resolution, promotion.
//!
//! References to the same array are partitioned into groups so that each
//! group can be given one local buffer. Two groups are joined when their
//! footprints may overlap and at least one of them writes; keeping them
//! separate would create two inconsistent copies of the same elements.
//!
//! Promotion runs per group, most-local first: a group goes to per-thread
//! private memory when no thread ever observes an element touched by a
//! different thread and the per-thread footprint has a fixed rectangular
//! bound; otherwise to block-shared memory when the block-level footprint
//! has such a bound; otherwise it stays in global memory.

use crate::isl_ext;
use crate::scop::Scop;
use crate::tile::{self, ArrayTile};
use isl_rs::{DimType, Map, MultiUnionPwAff, UnionMap, UnionSet};
use log::{debug, trace};

/// Memory space a group was promoted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Promotion {
    Private,
    Shared,
    Global,
}

/// A group of references to one array that share a local buffer.
#[derive(Debug)]
pub struct ArrayReferenceGroup {
    pub array: String,

    /// Ordinal among the groups of the same array, for naming.
    pub nr: usize,

    /// Combined access relation with the thread-level schedule coordinates
    /// as domain: `{ [host, block, thread] -> A[e] }`.
    pub access: UnionMap,

    /// Any member writes.
    pub write: bool,

    /// Every write member is a definite write.
    pub exact_write: bool,

    /// Some member accesses a set of elements per instance rather than a
    /// single element.
    pub slice: bool,

    /// Outermost schedule depth at which the footprint has a fixed bound.
    pub min_depth: usize,

    pub shared_tile: Option<ArrayTile>,
    pub private_tile: Option<ArrayTile>,

    /// Indices into the scop's access list.
    pub refs: Vec<usize>,
}

impl ArrayReferenceGroup {
    pub fn promotion(&self) -> Promotion {
        if self.private_tile.is_some() {
            Promotion::Private
        } else if self.shared_tile.is_some() {
            Promotion::Shared
        } else {
            Promotion::Global
        }
    }

    /// Buffer name for the printer. The ordinal is appended only when the
    /// array has several groups.
    pub fn local_name(&self, n_groups_for_array: usize) -> String {
        let prefix = match self.promotion() {
            Promotion::Private => "private_",
            Promotion::Shared => "shared_",
            Promotion::Global => "",
        };
        if n_groups_for_array > 1 {
            format!("{}{}_{}", prefix, self.array, self.nr)
        } else {
            format!("{}{}", prefix, self.array)
        }
    }

    /// Combined access relation of the member references in terms of
    /// original statement instances, optionally restricted to reads or
    /// writes.
    pub fn instance_access(
        &self,
        scop: &Scop,
        core: &UnionSet,
        read: bool,
        write: bool,
    ) -> UnionMap {
        let mut result = UnionMap::read_from_str(&scop.ctx, "{ }");
        for &idx in &self.refs {
            let acc = &scop.accesses[idx];
            if (read && !acc.write) || (write && acc.write) {
                result = isl_ext::union_map_union(result, acc.access.copy());
            }
        }
        result.intersect_domain(core.copy())
    }
}

/// Schedule prefixes and depths shared by grouping and promotion.
///
/// All union maps have original statement instances as domain. The thread
/// coordinates are `[host..kernel_depth | block..n_block | thread..n_thread]`,
/// so two instances run on the same thread exactly when their full thread
/// coordinate tuples agree.
pub struct GroupingData {
    pub kernel_depth: usize,

    /// Depth of the block-level prefix: `kernel_depth + n_block`.
    pub shared_depth: usize,

    /// Depth at which thread identifiers start; equals `shared_depth` here.
    pub thread_depth: usize,

    pub n_thread: usize,

    /// Statement instances belonging to the kernel.
    pub core: UnionSet,

    /// `{ S[i] -> [host] }`.
    pub host_sched: UnionMap,

    /// `{ S[i] -> [host, block] }`.
    pub shared_sched: UnionMap,

    /// `{ S[i] -> [host, block, thread] }`.
    pub thread_sched: UnionMap,

    /// Same mapping as `thread_sched`, kept as an expression for `eq_at`.
    pub thread_mupa: MultiUnionPwAff,
}

impl GroupingData {
    /// Total dimensionality of the thread-level coordinates.
    pub fn thread_dim(&self) -> usize {
        self.thread_depth + self.n_thread
    }
}

/// Builds one singleton group per reference to `array` inside the kernel.
///
/// References whose restriction to the kernel domain is empty are skipped.
pub fn build_singleton_groups(
    scop: &Scop,
    data: &GroupingData,
    array: &str,
) -> Vec<ArrayReferenceGroup> {
    let mut groups = Vec::new();
    for (idx, acc) in scop.accesses.iter().enumerate() {
        if acc.array != array {
            continue;
        }
        let instance = acc
            .access
            .copy()
            .intersect_domain(data.core.copy());
        if instance.is_empty() {
            continue;
        }
        let slice = !isl_ext::union_map_is_single_valued(&instance);
        let access = instance.apply_domain(data.thread_sched.copy());
        let min_depth = min_tile_depth(&access, data);
        groups.push(ArrayReferenceGroup {
            array: array.to_string(),
            nr: groups.len(),
            access,
            write: acc.write,
            exact_write: !acc.write || acc.exact_write,
            slice,
            min_depth,
            shared_tile: None,
            private_tile: None,
            refs: vec![idx],
        });
    }
    groups
}

/// Outermost depth in `kernel_depth..=shared_depth` at which the footprint
/// of `access` (thread-level coordinates as domain) has a fixed bound.
fn min_tile_depth(access: &UnionMap, data: &GroupingData) -> usize {
    let map = Map::from_union_map(access.copy());
    let total = map.dim(DimType::In) as usize;
    for depth in data.kernel_depth..=data.shared_depth {
        let projected = map
            .copy()
            .project_out(DimType::In, depth as u32, (total - depth) as u32);
        if tile::compute_tile(&projected, depth).is_some() {
            return depth;
        }
    }
    data.shared_depth
}

/// Coarse overlap: the element footprints of the two groups may intersect.
pub fn accesses_overlap(a: &ArrayReferenceGroup, b: &ArrayReferenceGroup) -> bool {
    !a.access
        .copy()
        .range()
        .intersect(b.access.copy().range())
        .is_empty()
}

/// Depth-qualified overlap: within any shared prefix of the first `depth`
/// schedule dimensions, the two groups may touch a common element.
pub fn overlap_at_depth(
    a: &ArrayReferenceGroup,
    b: &ArrayReferenceGroup,
    depth: usize,
) -> bool {
    let pa = project_to_depth(&a.access, depth);
    let pb = project_to_depth(&b.access, depth);
    !pa.intersect(pb).is_empty()
}

fn project_to_depth(access: &UnionMap, depth: usize) -> Map {
    let map = Map::from_union_map(access.copy());
    let total = map.dim(DimType::In) as usize;
    if depth >= total {
        return map;
    }
    map.project_out(DimType::In, depth as u32, (total - depth) as u32)
}

/// Joins two groups of the same array.
///
/// Relations are unioned, `write` and `slice` are or-ed, `exact_write`
/// survives only if both sides were exact, the depth is the outer of the two.
pub fn join_groups(a: &ArrayReferenceGroup, b: &ArrayReferenceGroup) -> ArrayReferenceGroup {
    let mut refs = a.refs.clone();
    for r in &b.refs {
        if !refs.contains(r) {
            refs.push(*r);
        }
    }
    ArrayReferenceGroup {
        array: a.array.clone(),
        nr: a.nr.min(b.nr),
        access: isl_ext::union_map_union(a.access.copy(), b.access.copy()),
        write: a.write || b.write,
        exact_write: a.exact_write && b.exact_write,
        slice: a.slice || b.slice,
        min_depth: a.min_depth.min(b.min_depth),
        shared_tile: None,
        private_tile: None,
        refs,
    }
}

/// Joins groups to a fixed point over an explicit worklist of pair
/// candidates. Two groups are joined when at least one writes and their
/// footprints overlap at the outer of their two depths.
///
/// The result never has more groups than the input, and running the join
/// again changes nothing.
pub fn join_all_groups(mut groups: Vec<ArrayReferenceGroup>) -> Vec<ArrayReferenceGroup> {
    let mut worklist: Vec<(usize, usize)> = pair_candidates(groups.len());

    while let Some((i, j)) = worklist.pop() {
        if i >= groups.len() || j >= groups.len() {
            continue;
        }
        let (a, b) = (&groups[i], &groups[j]);
        let joinable = (a.write || b.write)
            && accesses_overlap(a, b)
            && overlap_at_depth(a, b, a.min_depth.min(b.min_depth));
        if !joinable {
            continue;
        }
        trace!("joining groups {} and {} of {}", i, j, a.array);
        let joined = join_groups(a, b);
        groups.swap_remove(j);
        groups[i] = joined;
        // Indices shifted; requeue every pair involving the survivors.
        worklist = pair_candidates(groups.len());
    }

    for (nr, g) in groups.iter_mut().enumerate() {
        g.nr = nr;
    }
    groups
}

fn pair_candidates(n: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Decides the memory space for `group`, filling in its tiles.
///
/// Private requires that no instance observes an element touched by a
/// different thread, checked on same-element instance pairs against the
/// thread-coordinate mapping, plus a fixed per-thread footprint. Shared
/// requires a fixed block-level footprint; the block prefix carries no
/// thread identifiers, so independence from them is structural.
///
/// Both candidate tiles are computed; the per-thread copy is replicated
/// across the block, so it has to be strictly smaller than the shared tile
/// to win.
pub fn decide_promotion(
    scop: &Scop,
    data: &GroupingData,
    group: &mut ArrayReferenceGroup,
    disable: bool,
) {
    group.private_tile = None;
    group.shared_tile = None;
    if disable {
        return;
    }

    let private = if thread_locality_holds(scop, data, group) {
        let per_thread = Map::from_union_map(group.access.copy());
        tile::compute_tile(&per_thread, data.thread_dim())
    } else {
        None
    };
    let shared = block_level_tile(scop, data, group);

    if private.is_some() && (shared.is_none() || smaller_tile(private.as_ref(), shared.as_ref())) {
        if let Some(t) = &private {
            debug!(
                "group {} of {} promoted to private ({} elements)",
                group.nr,
                group.array,
                t.total_elements()
            );
        }
        group.private_tile = private;
        return;
    }

    if let Some(t) = shared {
        debug!(
            "group {} of {} promoted to shared ({} elements)",
            group.nr,
            group.array,
            t.total_elements()
        );
        group.shared_tile = Some(t);
        return;
    }

    debug!("group {} of {} stays in global memory", group.nr, group.array);
}

/// Block-level footprint tile of `group`, if it has a fixed bound.
fn block_level_tile(
    scop: &Scop,
    data: &GroupingData,
    group: &ArrayReferenceGroup,
) -> Option<ArrayTile> {
    let instance = group.instance_access(scop, &data.core, true, true);
    let block_access = Map::from_union_map(instance.apply_domain(data.shared_sched.copy()));
    tile::compute_tile(&block_access, data.shared_depth)
}

/// Merges groups of one array that go through shared memory when one
/// combined tile needs no more storage than the separate tiles it replaces.
/// Groups in private or global memory are left alone.
pub fn share_common_tile(
    scop: &Scop,
    data: &GroupingData,
    mut groups: Vec<ArrayReferenceGroup>,
) -> Vec<ArrayReferenceGroup> {
    let mut i = 0;
    while i < groups.len() {
        let mut j = i + 1;
        while j < groups.len() {
            let (Some(ti), Some(tj)) = (&groups[i].shared_tile, &groups[j].shared_tile) else {
                j += 1;
                continue;
            };
            let separate = ti.total_elements() + tj.total_elements();
            let mut joined = join_groups(&groups[i], &groups[j]);
            match block_level_tile(scop, data, &joined) {
                Some(t) if t.total_elements() <= separate => {
                    trace!(
                        "groups {} and {} of {} share one tile ({} elements)",
                        groups[i].nr,
                        groups[j].nr,
                        joined.array,
                        t.total_elements()
                    );
                    joined.shared_tile = Some(t);
                    groups.swap_remove(j);
                    groups[i] = joined;
                    // Re-scan against the merged group.
                    j = i + 1;
                }
                _ => j += 1,
            }
        }
        i += 1;
    }

    for (nr, g) in groups.iter_mut().enumerate() {
        g.nr = nr;
    }
    groups
}

/// True when every element written by the group is accessed only from the
/// thread that writes it.
fn thread_locality_holds(scop: &Scop, data: &GroupingData, group: &ArrayReferenceGroup) -> bool {
    if !group.write {
        return true;
    }
    let writes = group.instance_access(scop, &data.core, false, true);
    let all = group.instance_access(scop, &data.core, true, true);

    // { S1 -> S2 : S1 writes an element S2 accesses }
    let pairs = writes.apply_range(all.reverse());
    let same_thread = isl_ext::union_map_eq_at(pairs.copy(), data.thread_mupa.copy());
    isl_ext::union_map_subtract(pairs, same_thread).is_empty()
}

/// True when `a` needs strictly less storage than `b`; ties keep `b`.
pub fn smaller_tile(a: Option<&ArrayTile>, b: Option<&ArrayTile>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.total_elements() < b.total_elements(),
        (Some(_), None) => true,
        _ => false,
    }
}
