//! Kernel synthesis pipeline.
//!
//! Walks the schedule tree, turns each outermost tilable band into a device
//! kernel and rewrites the tree around it:
//!
//! ```text
//! guard                        launch only when the grid is non-empty
//!   context                    declares b*/t* parameters with their bounds
//!     filter (block ids)       instances on block (b0, b1, ...)
//!       band (tile loops)      block coordinates
//!         filter (thread ids)  instances on thread (t0, t1, ...)
//!           [mark: barrier]    when synchronization is required
//!             band (point loops)
//! ```
//!
//! Synchronization is analyzed on the tiled schedule before any identifier
//! filter is attached. Each kernel advances through the stage machine in
//! order; a transition out of order is a defect in this pipeline, reported
//! as such rather than as an input error.

use crate::band;
use crate::config::SynthesisConfig;
use crate::context_guard;
use crate::group::{self, GroupingData};
use crate::isl_ext;
use crate::kernel::{self, Kernel, KernelDepths, KernelStage, LocalArrayInfo};
use crate::launch::{self, LaunchGeometry};
use crate::scop::Scop;
use crate::sync::{self, SyncData};
use isl_rs::{
    Context, MultiUnionPwAff, Schedule, ScheduleNode, Set, UnionMap, UnionPwAff, UnionSet, Val,
};
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthesisError {
    /// The polyhedral algebra could not produce a usable result for this
    /// kernel. The kernel is abandoned without partial state.
    #[error("kernel {kernel}: {reason}")]
    Algebra { kernel: usize, reason: String },

    /// A pipeline invariant was violated. This is a bug here, not in the
    /// input.
    #[error("kernel {kernel}: internal defect: {reason}")]
    InternalDefect {
        kernel: usize,
        group: Option<usize>,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Outcome of a synthesis run: the rewritten schedule and the kernels that
/// were carved out of it.
pub struct SynthesisResult {
    pub schedule: Schedule,
    pub kernels: Vec<Kernel>,
}

/// Drives kernel synthesis over a scop.
pub struct KernelSynthesizer {
    ctx: Arc<Context>,
    config: SynthesisConfig,
}

impl KernelSynthesizer {
    pub fn new(ctx: Arc<Context>, config: SynthesisConfig) -> Result<Self, SynthesisError> {
        for (d, &t) in config.sizes.tile.iter().enumerate() {
            if t <= 0 {
                return Err(SynthesisError::Config(format!(
                    "tile size {} for dimension {} is not positive",
                    t, d
                )));
            }
        }
        for (d, &b) in config.sizes.block.iter().enumerate() {
            if b <= 0 {
                return Err(SynthesisError::Config(format!(
                    "block size {} for dimension {} is not positive",
                    b, d
                )));
            }
        }
        Ok(KernelSynthesizer { ctx, config })
    }

    /// Synthesizes every kernel in the scop, outermost bands first.
    pub fn synthesize(&self, scop: &Scop) -> Result<SynthesisResult, SynthesisError> {
        let mut schedule = scop.schedule.copy();
        let mut kernels: Vec<Kernel> = Vec::new();
        let mut visited: Option<UnionSet> = None;

        loop {
            let root = schedule.get_root();
            let candidate = band::find_outermost_bands(&root).into_iter().find_map(|b| {
                let core = isl_ext::node_domain(&b);
                let fresh = match &visited {
                    None => true,
                    Some(v) => !isl_ext::union_set_subtract(core.copy(), v.copy()).is_empty(),
                };
                fresh.then_some((b, core))
            });
            let Some((band_node, core)) = candidate else { break };

            visited = Some(match visited {
                None => core.copy(),
                Some(v) => isl_ext::union_set_union(v, core.copy()),
            });

            if band_node.band_n_member() == 0 {
                continue;
            }
            if self.config.require_coincident && !band::has_coincident_member(&band_node) {
                debug!("skipping band without coincident members");
                continue;
            }

            let id = kernels.len();
            info!("synthesizing kernel {}", id);
            match run_guarded(id, || self.process_kernel(scop, band_node, core, id)) {
                Ok((next, k)) => {
                    schedule = next;
                    kernels.push(k);
                }
                Err(SynthesisError::Algebra { kernel, reason }) => {
                    warn!("kernel {}: {}; band left unmapped", kernel, reason);
                }
                Err(other) => return Err(other),
            }
        }

        Ok(SynthesisResult { schedule, kernels })
    }

    /// Runs the full stage sequence for one kernel and rewrites its subtree.
    fn process_kernel(
        &self,
        scop: &Scop,
        band_node: ScheduleNode,
        core: UnionSet,
        id: usize,
    ) -> Result<(Schedule, Kernel), SynthesisError> {
        let ctx = &self.ctx;
        let mut k = Kernel::new(id, core);

        // Launch-point parameter constraints.
        let kernel_context = context_guard::extract_context(&k.core, &scop.context);
        k.context = Some(kernel_context.copy());
        k.advance(KernelStage::ContextBuilt)?;

        // Effective sizes and depths.
        let n_members = band_node.band_n_member() as usize;
        let n_map = band::mapped_dims(&band_node);
        let (tile_sizes, block_sizes) =
            launch::effective_sizes(n_members, n_map, &self.config.sizes);
        let kernel_depth = isl_ext::schedule_depth(&band_node) as usize;
        let depths = KernelDepths {
            kernel_depth,
            shared_depth: kernel_depth + n_map,
            thread_depth: kernel_depth + n_map,
            n_thread: n_map,
        };
        depths.validate(id)?;
        k.depths = Some(depths);

        // Coordinate expressions over original statement instances.
        let prefixes = self.build_prefixes(&band_node, &tile_sizes, &block_sizes, n_map);

        // Grid from the blocks actually reached.
        let blocks_umap = UnionMap::from_multi_union_pw_aff(prefixes.tiles_only.copy())
            .intersect_domain(k.core.copy());
        let blocks = isl_rs::Set::from_union_set(blocks_umap.range());
        let grid = launch::compute_grid(&blocks, n_map, &self.config.sizes);
        let geometry = LaunchGeometry {
            grid,
            block: block_sizes.clone(),
            tile: tile_sizes.clone(),
        };
        k.assign_id_names(n_map, n_map, &scop_param_names(scop));
        k.geometry = Some(geometry.clone());
        k.advance(KernelStage::GeometrySized)?;

        // Grouping and promotion.
        let data = GroupingData {
            kernel_depth,
            shared_depth: depths.shared_depth,
            thread_depth: depths.thread_depth,
            n_thread: n_map,
            core: k.core.copy(),
            host_sched: UnionMap::from_multi_union_pw_aff(prefixes.host.copy())
                .intersect_domain(k.core.copy()),
            shared_sched: UnionMap::from_multi_union_pw_aff(prefixes.block.copy())
                .intersect_domain(k.core.copy()),
            thread_sched: UnionMap::from_multi_union_pw_aff(prefixes.thread.copy())
                .intersect_domain(k.core.copy()),
            thread_mupa: prefixes.thread.copy(),
        };
        k.local_arrays = self.build_local_arrays(scop, &data, &kernel_context);
        for i in 0..k.local_arrays.len() {
            for j in 0..k.local_arrays[i].groups.len() {
                // Reserve the printer-facing buffer names now so scalars
                // created later cannot collide with them.
                let name = k.local_arrays[i].groups[j].local_name(k.local_arrays[i].groups.len());
                k.unique_name(&name);
            }
        }
        k.advance(KernelStage::Grouped)?;

        // Tile the band in the tree.
        let tiled = band::tile_band(ctx, band_node, &tile_sizes);
        let schedule = tiled.get_schedule();
        k.advance(KernelStage::Tiled)?;

        // Synchronization on the tiled schedule, before filters.
        let sync_data = SyncData {
            host_mupa: prefixes.host.copy(),
            block_mupa: prefixes.block.copy(),
            thread_mupa: prefixes.thread.copy(),
            inter_mupa: prefixes.inter.copy(),
        };
        let sync_set = sync::compute_sync(scop, &k.core, &schedule, &sync_data);
        let needs_barrier = !sync_set.is_empty();
        k.sync = Some(sync_set);
        k.advance(KernelStage::Synchronized)?;

        // Attach thread-side nodes below the tile band.
        let tile_band = locate_band(&schedule, &k.core, id)?;
        let mut inner = tile_band.child(0);
        if needs_barrier {
            inner = sync::insert_barrier(inner, ctx);
        }
        let thread_filter = kernel::id_filter(
            ctx,
            &k.core,
            &prefixes.thread,
            depths.thread_depth,
            &k.thread_ids,
        );
        let inner = kernel::insert_filter(inner, thread_filter);
        let schedule = inner.get_schedule();

        // Wrap the tile band in block filter, context and guard.
        let tile_band = locate_band(&schedule, &k.core, id)?;
        let block_filter =
            kernel::id_filter(ctx, &k.core, &prefixes.thread, kernel_depth, &k.block_ids);
        let node = kernel::insert_filter(tile_band, block_filter);
        let launch_context =
            context_guard::build_launch_context(ctx, &k.block_ids, &k.thread_ids, &geometry);
        let node = context_guard::insert_context(node, launch_context);
        let guard = context_guard::build_guard(ctx, &geometry, &kernel_context);
        let node = context_guard::insert_guard(node, guard);
        let schedule = node.get_schedule();
        k.advance(KernelStage::Guarded)?;

        k.advance(KernelStage::Final)?;
        Ok((schedule, k))
    }

    /// Builds all coordinate expressions of one kernel from the original
    /// band: host prefix, block coordinates (`floor(S/tile)`), thread
    /// identifiers (`(S mod tile) mod block`), and the intermediate-band
    /// iteration (`floor((S mod tile)/block)`).
    fn build_prefixes(
        &self,
        band_node: &ScheduleNode,
        tile_sizes: &[i64],
        block_sizes: &[i64],
        n_map: usize,
    ) -> Prefixes {
        let ctx = &self.ctx;
        let partial = band_node.band_get_partial_schedule();
        let host = isl_ext::node_prefix_mupa(band_node);

        let mut tiles: Option<MultiUnionPwAff> = None;
        let mut threads: Option<MultiUnionPwAff> = None;
        let mut inters: Option<MultiUnionPwAff> = None;
        for d in 0..n_map {
            let member = partial.get_at(d as i32);
            let tile = Val::int_from_si(ctx, tile_sizes[d]);
            let block = Val::int_from_si(ctx, block_sizes[d]);

            let tile_coord = member.copy().scale_down_val(tile.copy()).floor();
            let point = member.mod_val(tile);
            let thread = point.copy().mod_val(block.copy());
            let inter = point.scale_down_val(block).floor();

            tiles = Some(append_upa(tiles, tile_coord));
            threads = Some(append_upa(threads, thread));
            inters = Some(append_upa(inters, inter));
        }

        // Bands with zero members are never kernels, so the options are
        // always filled by the loop above.
        let tiles = tiles.unwrap_or_else(|| partial.copy());
        let threads = threads.unwrap_or_else(|| partial.copy());
        let inters = inters.unwrap_or_else(|| partial.copy());

        let block = isl_ext::mupa_flat_range_product(host.copy(), tiles.copy());
        let thread = isl_ext::mupa_flat_range_product(block.copy(), threads);
        let inter = isl_ext::mupa_flat_range_product(block.copy(), inters);

        Prefixes {
            host,
            tiles_only: tiles,
            block,
            thread,
            inter,
        }
    }

    /// Builds the per-array group lists with promotion decided and the
    /// declared extents localized to the launch point.
    fn build_local_arrays(
        &self,
        scop: &Scop,
        data: &GroupingData,
        kernel_context: &Set,
    ) -> Vec<LocalArrayInfo> {
        let mut result = Vec::new();
        for array in &scop.arrays {
            let singletons = group::build_singleton_groups(scop, data, &array.name);
            if singletons.is_empty() {
                continue;
            }
            let mut groups = group::join_all_groups(singletons);
            for g in &mut groups {
                group::decide_promotion(scop, data, g, self.config.disable_promotion);
            }
            let groups = group::share_common_tile(scop, data, groups);
            let global = groups
                .iter()
                .any(|g| g.promotion() == group::Promotion::Global);
            let bounds = array
                .extents
                .iter()
                .map(|e| {
                    context_guard::localize_extent(&self.ctx, e, kernel_context)
                        .unwrap_or_else(|| e.clone())
                })
                .collect();
            result.push(LocalArrayInfo {
                array: array.name.clone(),
                bounds,
                global,
                groups,
            });
        }
        result
    }
}

/// Coordinate expressions of one kernel over original statement instances.
struct Prefixes {
    host: MultiUnionPwAff,
    tiles_only: MultiUnionPwAff,
    block: MultiUnionPwAff,
    thread: MultiUnionPwAff,
    inter: MultiUnionPwAff,
}

fn append_upa(mupa: Option<MultiUnionPwAff>, upa: UnionPwAff) -> MultiUnionPwAff {
    let single = isl_ext::mupa_from_upa(upa);
    match mupa {
        None => single,
        Some(m) => isl_ext::mupa_flat_range_product(m, single),
    }
}

/// Runs one kernel's stage sequence with a panic guard. The algebra engine
/// aborts through the bindings by panicking; that costs the kernel, not the
/// whole run.
fn run_guarded<T>(
    kernel: usize,
    f: impl FnOnce() -> Result<T, SynthesisError>,
) -> Result<T, SynthesisError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "algebra failure".to_string());
        Err(SynthesisError::Algebra { kernel, reason })
    })
}

/// Finds the (tile) band of the kernel with the given core domain in the
/// current schedule.
fn locate_band(
    schedule: &Schedule,
    core: &UnionSet,
    kernel: usize,
) -> Result<ScheduleNode, SynthesisError> {
    let root = schedule.get_root();
    band::find_outermost_bands(&root)
        .into_iter()
        .find(|b| isl_ext::union_set_is_equal(&isl_ext::node_domain(b), core))
        .ok_or_else(|| SynthesisError::InternalDefect {
            kernel,
            group: None,
            reason: "kernel band vanished from the schedule tree".to_string(),
        })
}

fn scop_param_names(scop: &Scop) -> Vec<String> {
    // Parameter names appear in the textual form of the context set; the
    // bracketed prefix lists them.
    let text = scop.context.to_str().to_string();
    let Some(end) = text.find("->") else {
        return Vec::new();
    };
    text[..end]
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(|c: char| c == ']' || c.is_whitespace())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
