//! Per-kernel state: launch unit metadata and the synthesis stage machine.

use crate::group::ArrayReferenceGroup;
use crate::isl_ext;
use crate::launch::LaunchGeometry;
use crate::pipeline::SynthesisError;
use crate::sync::SyncSet;
use isl_rs::{Context, Id, MultiUnionPwAff, Set, UnionPwAff, UnionSet};
use std::collections::HashSet;

/// Synthesis stages, in the only order they may be visited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KernelStage {
    Extracted,
    ContextBuilt,
    GeometrySized,
    Grouped,
    Tiled,
    Synchronized,
    Guarded,
    Final,
}

impl KernelStage {
    fn successor(self) -> Option<KernelStage> {
        use KernelStage::*;
        match self {
            Extracted => Some(ContextBuilt),
            ContextBuilt => Some(GeometrySized),
            GeometrySized => Some(Grouped),
            Grouped => Some(Tiled),
            Tiled => Some(Synchronized),
            Synchronized => Some(Guarded),
            Guarded => Some(Final),
            Final => None,
        }
    }
}

/// Schedule depths of one kernel, in the layout
/// `[host.. | block.. | thread.. | rest..]`.
#[derive(Clone, Copy, Debug)]
pub struct KernelDepths {
    /// Schedule dimensions above the kernel's tile band.
    pub kernel_depth: usize,

    /// Depth of the block-level prefix: `kernel_depth` plus the number of
    /// block identifiers.
    pub shared_depth: usize,

    /// Depth at which thread identifiers start.
    pub thread_depth: usize,

    pub n_thread: usize,
}

impl KernelDepths {
    pub fn validate(&self, kernel: usize) -> Result<(), SynthesisError> {
        if self.thread_depth > self.shared_depth {
            return Err(SynthesisError::InternalDefect {
                kernel,
                group: None,
                reason: format!(
                    "thread depth {} exceeds shared depth {}",
                    self.thread_depth, self.shared_depth
                ),
            });
        }
        if self.shared_depth < self.kernel_depth {
            return Err(SynthesisError::InternalDefect {
                kernel,
                group: None,
                reason: format!(
                    "shared depth {} above kernel depth {}",
                    self.shared_depth, self.kernel_depth
                ),
            });
        }
        Ok(())
    }
}

/// Per-kernel view of one source array and its reference groups.
#[derive(Debug)]
pub struct LocalArrayInfo {
    pub array: String,

    /// Declared extents, one expression per array dimension, with the
    /// launch-point parameter constraints folded in.
    pub bounds: Vec<String>,

    /// At least one group stays in global memory.
    pub global: bool,

    pub groups: Vec<ArrayReferenceGroup>,
}

/// One synthesized launch unit.
pub struct Kernel {
    pub id: usize,
    pub stage: KernelStage,

    /// Statement instances executed by this kernel.
    pub core: UnionSet,

    /// Parameter constraints valid at the launch point.
    pub context: Option<Set>,

    pub depths: Option<KernelDepths>,
    pub geometry: Option<LaunchGeometry>,
    pub local_arrays: Vec<LocalArrayInfo>,
    pub sync: Option<SyncSet>,

    /// Names of the block identifier parameters, outermost first.
    pub block_ids: Vec<String>,

    /// Names of the thread identifier parameters, outermost first.
    pub thread_ids: Vec<String>,

    var_names: HashSet<String>,
}

impl Kernel {
    pub fn new(id: usize, core: UnionSet) -> Kernel {
        Kernel {
            id,
            stage: KernelStage::Extracted,
            core,
            context: None,
            depths: None,
            geometry: None,
            local_arrays: Vec::new(),
            sync: None,
            block_ids: Vec::new(),
            thread_ids: Vec::new(),
            var_names: HashSet::new(),
        }
    }

    /// Moves the kernel to the next stage. Only the immediate successor is
    /// legal; anything else is a defect in the pipeline, not in the input.
    pub fn advance(&mut self, to: KernelStage) -> Result<(), SynthesisError> {
        if self.stage.successor() == Some(to) {
            self.stage = to;
            return Ok(());
        }
        Err(SynthesisError::InternalDefect {
            kernel: self.id,
            group: None,
            reason: format!("illegal stage transition {:?} -> {:?}", self.stage, to),
        })
    }

    /// Returns `base` if unused in this kernel's namespace, otherwise the
    /// first free `base_<n>`. The returned name is reserved.
    pub fn unique_name(&mut self, base: &str) -> String {
        if self.var_names.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.var_names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Reserves block and thread identifier names (`b0..`, `t0..`),
    /// steering around any colliding program parameters.
    pub fn assign_id_names(&mut self, n_block: usize, n_thread: usize, taken: &[String]) {
        for name in taken {
            self.var_names.insert(name.clone());
        }
        self.block_ids = (0..n_block)
            .map(|d| self.unique_name(&format!("b{}", d)))
            .collect();
        self.thread_ids = (0..n_thread)
            .map(|d| self.unique_name(&format!("t{}", d)))
            .collect();
    }
}

/// Builds the filter selecting the instances whose schedule coordinates
/// match the identifier parameters.
///
/// `mupa` maps statement instances to schedule coordinates; the members at
/// `offset..offset + ids.len()` are equated with the parameters named by
/// `ids`.
pub fn id_filter(
    ctx: &Context,
    core: &UnionSet,
    mupa: &MultiUnionPwAff,
    offset: usize,
    ids: &[String],
) -> UnionSet {
    let mut filter = core.copy();
    for (d, name) in ids.iter().enumerate() {
        let coord = mupa.get_at((offset + d) as i32);
        let param = UnionPwAff::param_on_domain_id(core.copy(), Id::read_from_str(ctx, name));
        let matches = coord.sub(param).zero_union_set();
        filter = filter.intersect(matches);
    }
    filter
}

/// Attaches a filter node below `node`.
pub fn insert_filter(node: isl_rs::ScheduleNode, filter: UnionSet) -> isl_rs::ScheduleNode {
    isl_ext::insert_filter(node, filter)
}
