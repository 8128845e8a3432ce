//! Low-level ISL extensions not surfaced by the published bindings.
//!
//! The bindings cover the schedule-node and set/map APIs we need almost
//! everywhere, but a handful of operations used by kernel synthesis are only
//! reachable through direct FFI:
//!
//! - replacing a band's partial schedule (node-level ISL has no setter; we
//!   bridge through the tree-level API with `isl_schedule_node_get_tree` /
//!   `isl_schedule_node_graft_tree`, the same route mature polyhedral tools
//!   take),
//! - the simple fixed-box hull of an access footprint (`isl_fixed_box`),
//! - stride information on a set dimension,
//! - parametric dimension maxima rendered as expressions,
//! - the global tiling options controlling tile-loop scaling and point-loop
//!   shifting.
//!
//! Ownership follows ISL's reference counting: a value passed to an
//! `__isl_take` parameter has its `should_free_on_drop` flag cleared before
//! the pointer is handed over, and every pointer received from an
//! `__isl_give` result is wrapped back into an owning binding value.

use isl_rs::{Context, Map, MultiUnionPwAff, ScheduleNode, Set, UnionMap, UnionPwAff, UnionSet};
use libc::uintptr_t;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

extern "C" {
    fn isl_schedule_node_get_tree(node: uintptr_t) -> uintptr_t;
    fn isl_schedule_node_graft_tree(node: uintptr_t, tree: uintptr_t) -> uintptr_t;
    fn isl_schedule_tree_band_set_partial_schedule(
        tree: uintptr_t,
        partial: uintptr_t,
    ) -> uintptr_t;

    fn isl_schedule_node_band_split(node: uintptr_t, pos: i32) -> uintptr_t;
    fn isl_schedule_node_get_schedule_depth(node: uintptr_t) -> i32;
    fn isl_schedule_node_get_domain(node: uintptr_t) -> uintptr_t;
    fn isl_schedule_node_get_prefix_schedule_multi_union_pw_aff(node: uintptr_t) -> uintptr_t;
    fn isl_schedule_node_insert_context(node: uintptr_t, context: uintptr_t) -> uintptr_t;
    fn isl_schedule_node_insert_guard(node: uintptr_t, guard: uintptr_t) -> uintptr_t;
    fn isl_schedule_node_insert_filter(node: uintptr_t, filter: uintptr_t) -> uintptr_t;
    fn isl_set_n_basic_set(set: uintptr_t) -> i32;

    fn isl_union_map_union(umap1: uintptr_t, umap2: uintptr_t) -> uintptr_t;
    fn isl_union_map_subtract(umap1: uintptr_t, umap2: uintptr_t) -> uintptr_t;
    fn isl_union_map_eq_at_multi_union_pw_aff(umap: uintptr_t, mupa: uintptr_t) -> uintptr_t;
    fn isl_union_map_is_single_valued(umap: uintptr_t) -> i32;
    fn isl_union_set_union(uset1: uintptr_t, uset2: uintptr_t) -> uintptr_t;
    fn isl_union_set_subtract(uset1: uintptr_t, uset2: uintptr_t) -> uintptr_t;
    fn isl_union_set_is_equal(uset1: uintptr_t, uset2: uintptr_t) -> i32;
    fn isl_set_is_equal(set1: uintptr_t, set2: uintptr_t) -> i32;
    fn isl_set_is_subset(set1: uintptr_t, set2: uintptr_t) -> i32;
    fn isl_multi_union_pw_aff_flat_range_product(
        mupa1: uintptr_t,
        mupa2: uintptr_t,
    ) -> uintptr_t;
    fn isl_multi_union_pw_aff_from_union_pw_aff(upa: uintptr_t) -> uintptr_t;

    fn isl_map_get_range_simple_fixed_box_hull(map: uintptr_t) -> uintptr_t;
    fn isl_fixed_box_is_valid(box_: uintptr_t) -> i32;
    fn isl_fixed_box_get_offset(box_: uintptr_t) -> uintptr_t;
    fn isl_fixed_box_get_size(box_: uintptr_t) -> uintptr_t;
    fn isl_fixed_box_free(box_: uintptr_t) -> uintptr_t;

    fn isl_multi_aff_get_aff(ma: uintptr_t, pos: i32) -> uintptr_t;
    fn isl_multi_aff_size(ma: uintptr_t) -> i32;
    fn isl_multi_aff_free(ma: uintptr_t) -> uintptr_t;
    fn isl_aff_to_str(aff: uintptr_t) -> *mut c_char;
    fn isl_aff_free(aff: uintptr_t) -> uintptr_t;

    fn isl_multi_val_get_val(mv: uintptr_t, pos: i32) -> uintptr_t;
    fn isl_multi_val_size(mv: uintptr_t) -> i32;
    fn isl_multi_val_free(mv: uintptr_t) -> uintptr_t;
    fn isl_val_is_int(v: uintptr_t) -> i32;
    fn isl_val_get_num_si(v: uintptr_t) -> i64;
    fn isl_val_free(v: uintptr_t) -> uintptr_t;

    fn isl_set_involves_dims(set: uintptr_t, dim_type: u32, first: u32, n: u32) -> i32;
    fn isl_set_get_stride(set: uintptr_t, pos: i32) -> uintptr_t;
    fn isl_set_dim_max(set: uintptr_t, pos: i32) -> uintptr_t;
    fn isl_pw_aff_read_from_str(ctx: uintptr_t, str: *const c_char) -> uintptr_t;
    fn isl_pw_aff_gist_params(pa: uintptr_t, context: uintptr_t) -> uintptr_t;
    fn isl_pw_aff_n_piece(pa: uintptr_t) -> i32;
    fn isl_pw_aff_to_str(pa: uintptr_t) -> *mut c_char;
    fn isl_pw_aff_free(pa: uintptr_t) -> uintptr_t;

    fn isl_options_set_tile_scale_tile_loops(ctx: uintptr_t, val: i32) -> i32;
    fn isl_options_set_tile_shift_point_loops(ctx: uintptr_t, val: i32) -> i32;

    fn free(ptr: *mut c_char);
}

/// Copies an ISL-allocated C string into a Rust `String` and releases it.
fn take_isl_str(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { free(ptr) };
    Some(s)
}

/// Transfers ownership of a binding value to ISL and returns the raw pointer.
macro_rules! take_ptr {
    ($v:expr) => {{
        let mut v = $v;
        v.should_free_on_drop = false;
        v.ptr
    }};
}

/// Replaces the partial schedule of a band node, preserving its children.
///
/// Node-level ISL has no `band_set_partial_schedule`; the tree-level API does.
/// We detach the tree, rewrite the band, and graft the result back.
pub fn band_replace_partial_schedule(
    node: ScheduleNode,
    partial: MultiUnionPwAff,
) -> ScheduleNode {
    let node_ptr = take_ptr!(node);
    let partial_ptr = take_ptr!(partial);
    let result = unsafe {
        let tree = isl_schedule_node_get_tree(node_ptr);
        let tree = isl_schedule_tree_band_set_partial_schedule(tree, partial_ptr);
        isl_schedule_node_graft_tree(node_ptr, tree)
    };
    ScheduleNode {
        ptr: result,
        should_free_on_drop: true,
    }
}

/// Splits a band node into an outer band with `pos` members and an inner band
/// with the rest. The result points at the outer band.
pub fn band_split(node: ScheduleNode, pos: i32) -> ScheduleNode {
    let p = take_ptr!(node);
    ScheduleNode {
        ptr: unsafe { isl_schedule_node_band_split(p, pos) },
        should_free_on_drop: true,
    }
}

/// Number of schedule dimensions contributed by the ancestors of `node`.
pub fn schedule_depth(node: &ScheduleNode) -> i32 {
    unsafe { isl_schedule_node_get_schedule_depth(node.ptr) }
}

/// Statement instances that reach `node`.
pub fn node_domain(node: &ScheduleNode) -> UnionSet {
    UnionSet {
        ptr: unsafe { isl_schedule_node_get_domain(node.ptr) },
        should_free_on_drop: true,
    }
}

/// Schedule prefix of `node` as one expression per outer dimension.
pub fn node_prefix_mupa(node: &ScheduleNode) -> MultiUnionPwAff {
    MultiUnionPwAff {
        ptr: unsafe { isl_schedule_node_get_prefix_schedule_multi_union_pw_aff(node.ptr) },
        should_free_on_drop: true,
    }
}

/// Inserts a context node above `node`.
pub fn insert_context(node: ScheduleNode, context: Set) -> ScheduleNode {
    let pn = take_ptr!(node);
    let pc = take_ptr!(context);
    ScheduleNode {
        ptr: unsafe { isl_schedule_node_insert_context(pn, pc) },
        should_free_on_drop: true,
    }
}

/// Inserts a guard node above `node`.
pub fn insert_guard(node: ScheduleNode, guard: Set) -> ScheduleNode {
    let pn = take_ptr!(node);
    let pg = take_ptr!(guard);
    ScheduleNode {
        ptr: unsafe { isl_schedule_node_insert_guard(pn, pg) },
        should_free_on_drop: true,
    }
}

/// Inserts a filter node above `node`.
pub fn insert_filter(node: ScheduleNode, filter: UnionSet) -> ScheduleNode {
    let pn = take_ptr!(node);
    let pf = take_ptr!(filter);
    ScheduleNode {
        ptr: unsafe { isl_schedule_node_insert_filter(pn, pf) },
        should_free_on_drop: true,
    }
}

/// Number of basic sets in the disjunction describing `set`.
pub fn set_n_basic_set(set: &Set) -> i32 {
    unsafe { isl_set_n_basic_set(set.ptr) }
}

pub fn union_map_union(a: UnionMap, b: UnionMap) -> UnionMap {
    let pa = take_ptr!(a);
    let pb = take_ptr!(b);
    UnionMap {
        ptr: unsafe { isl_union_map_union(pa, pb) },
        should_free_on_drop: true,
    }
}

pub fn union_map_subtract(a: UnionMap, b: UnionMap) -> UnionMap {
    let pa = take_ptr!(a);
    let pb = take_ptr!(b);
    UnionMap {
        ptr: unsafe { isl_union_map_subtract(pa, pb) },
        should_free_on_drop: true,
    }
}

/// Restricts `umap` to pairs on which `mupa` evaluates to equal values.
pub fn union_map_eq_at(umap: UnionMap, mupa: MultiUnionPwAff) -> UnionMap {
    let pu = take_ptr!(umap);
    let pm = take_ptr!(mupa);
    UnionMap {
        ptr: unsafe { isl_union_map_eq_at_multi_union_pw_aff(pu, pm) },
        should_free_on_drop: true,
    }
}

/// True when every domain element maps to at most one range element.
pub fn union_map_is_single_valued(umap: &UnionMap) -> bool {
    unsafe { isl_union_map_is_single_valued(umap.ptr) == 1 }
}

pub fn union_set_union(a: UnionSet, b: UnionSet) -> UnionSet {
    let pa = take_ptr!(a);
    let pb = take_ptr!(b);
    UnionSet {
        ptr: unsafe { isl_union_set_union(pa, pb) },
        should_free_on_drop: true,
    }
}

pub fn union_set_subtract(a: UnionSet, b: UnionSet) -> UnionSet {
    let pa = take_ptr!(a);
    let pb = take_ptr!(b);
    UnionSet {
        ptr: unsafe { isl_union_set_subtract(pa, pb) },
        should_free_on_drop: true,
    }
}

pub fn union_set_is_equal(a: &UnionSet, b: &UnionSet) -> bool {
    unsafe { isl_union_set_is_equal(a.ptr, b.ptr) == 1 }
}

pub fn set_is_equal(a: &Set, b: &Set) -> bool {
    unsafe { isl_set_is_equal(a.ptr, b.ptr) == 1 }
}

pub fn set_is_subset(a: &Set, b: &Set) -> bool {
    unsafe { isl_set_is_subset(a.ptr, b.ptr) == 1 }
}

pub fn mupa_flat_range_product(a: MultiUnionPwAff, b: MultiUnionPwAff) -> MultiUnionPwAff {
    let pa = take_ptr!(a);
    let pb = take_ptr!(b);
    MultiUnionPwAff {
        ptr: unsafe { isl_multi_union_pw_aff_flat_range_product(pa, pb) },
        should_free_on_drop: true,
    }
}

/// Wraps a single expression into a one-member multi expression.
pub fn mupa_from_upa(upa: UnionPwAff) -> MultiUnionPwAff {
    let p = take_ptr!(upa);
    MultiUnionPwAff {
        ptr: unsafe { isl_multi_union_pw_aff_from_union_pw_aff(p) },
        should_free_on_drop: true,
    }
}

/// Per-dimension bounding box of a map's range, relative to its domain.
///
/// `offsets[d]` is the affine lower bound as a function of the domain
/// coordinates, `sizes[d]` the constant extent. `None` when ISL cannot
/// express the footprint as a fixed box.
pub struct FixedBox {
    pub offsets: Vec<String>,
    pub sizes: Vec<i64>,
}

pub fn range_fixed_box(map: &Map) -> Option<FixedBox> {
    unsafe {
        let box_ = isl_map_get_range_simple_fixed_box_hull(map.ptr);
        if box_ == 0 {
            return None;
        }
        if isl_fixed_box_is_valid(box_) != 1 {
            isl_fixed_box_free(box_);
            return None;
        }

        let offset = isl_fixed_box_get_offset(box_);
        let size = isl_fixed_box_get_size(box_);
        isl_fixed_box_free(box_);

        let n = isl_multi_aff_size(offset);
        let mut offsets = Vec::with_capacity(n as usize);
        for d in 0..n {
            let aff = isl_multi_aff_get_aff(offset, d);
            let s = take_isl_str(isl_aff_to_str(aff)).unwrap_or_default();
            isl_aff_free(aff);
            offsets.push(s);
        }
        isl_multi_aff_free(offset);

        let n = isl_multi_val_size(size);
        let mut sizes = Vec::with_capacity(n as usize);
        for d in 0..n {
            let v = isl_multi_val_get_val(size, d);
            let sz = if isl_val_is_int(v) == 1 {
                isl_val_get_num_si(v)
            } else {
                isl_val_free(v);
                isl_multi_val_free(size);
                return None;
            };
            isl_val_free(v);
            sizes.push(sz);
        }
        isl_multi_val_free(size);

        Some(FixedBox { offsets, sizes })
    }
}

/// True when the description of `set` refers to any of its parameters.
pub fn set_involves_params(set: &Set) -> bool {
    let n = set.dim(isl_rs::DimType::Param) as u32;
    if n == 0 {
        return false;
    }
    // isl_dim_param = 1 in ISL's dim type enumeration.
    unsafe { isl_set_involves_dims(set.ptr, 1, 0, n) == 1 }
}

/// Stride of the values in dimension `pos` of `set`; 1 when dense or unknown.
pub fn set_stride(set: &Set, pos: i32) -> i64 {
    unsafe {
        let v = isl_set_get_stride(set.ptr, pos);
        if v == 0 {
            return 1;
        }
        let s = if isl_val_is_int(v) == 1 {
            isl_val_get_num_si(v)
        } else {
            1
        };
        isl_val_free(v);
        if s > 0 {
            s
        } else {
            1
        }
    }
}

/// Maximum of dimension `pos` over `set`, rendered as an affine expression
/// over the parameters. Used when the bound is not a constant.
///
/// `None` when the maximum has more than one piece; a single piece's body
/// can be lifted back into a plain expression, a piecewise result cannot.
pub fn set_dim_max_str(set: &Set, pos: i32) -> Option<String> {
    let copy = set.copy();
    let set_ptr = take_ptr!(copy);
    unsafe {
        let pa = isl_set_dim_max(set_ptr, pos);
        if pa == 0 {
            return None;
        }
        let s = if isl_pw_aff_n_piece(pa) == 1 {
            take_isl_str(isl_pw_aff_to_str(pa))
        } else {
            None
        };
        isl_pw_aff_free(pa);
        s
    }
}

/// Reads a piecewise affine expression, simplifies it against a parameter
/// context, and renders it back. `None` on parse failure or when the result
/// has more than one piece.
pub fn pw_aff_gist_params_str(ctx: &Context, expr: &str, context: &Set) -> Option<String> {
    let text = CString::new(expr).ok()?;
    unsafe {
        let pa = isl_pw_aff_read_from_str(ctx.ptr, text.as_ptr());
        if pa == 0 {
            return None;
        }
        let params = context.copy();
        let params_ptr = take_ptr!(params);
        let pa = isl_pw_aff_gist_params(pa, params_ptr);
        if pa == 0 {
            return None;
        }
        let s = if isl_pw_aff_n_piece(pa) == 1 {
            take_isl_str(isl_pw_aff_to_str(pa))
        } else {
            None
        };
        isl_pw_aff_free(pa);
        s
    }
}

/// Configures ISL's band tiling: whether tile loops are rescaled by the tile
/// size and whether point loops are shifted to start at zero.
pub fn set_tile_options(ctx: &Context, scale_tile_loops: bool, shift_point_loops: bool) {
    unsafe {
        isl_options_set_tile_scale_tile_loops(ctx.ptr, scale_tile_loops as i32);
        isl_options_set_tile_shift_point_loops(ctx.ptr, shift_point_loops as i32);
    }
}
