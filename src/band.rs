//! Band transformations for kernel synthesis.
//!
//! All operations here act on one band node at a time and return the
//! transformed node; callers regain the schedule with `get_schedule()`.
//! Tiling uses ISL's native `band_tile` with point-loop shifting on and
//! tile-loop scaling off, so after tiling the outer (tile) band directly
//! enumerates block coordinates and the inner (point) band starts at zero
//! within each tile.

use crate::config::MAX_MAPPED_DIMS;
use crate::isl_ext;
use isl_rs::{
    Context, MultiUnionPwAff, MultiVal, ScheduleNode, ScheduleNodeType, Val, ValList,
};
use log::debug;

/// Finds the first (outermost, leftmost) band node below `node`.
pub fn find_first_band(node: &ScheduleNode) -> Option<ScheduleNode> {
    if node.get_type() == ScheduleNodeType::Band {
        return Some(node.copy());
    }
    let n = node.n_children();
    for i in 0..n {
        if let Some(band) = find_first_band(&node.copy().child(i)) {
            return Some(band);
        }
    }
    None
}

/// Finds every maximal outermost band below `node`: bands that have no band
/// ancestor. Each is a kernel candidate.
pub fn find_outermost_bands(node: &ScheduleNode) -> Vec<ScheduleNode> {
    let mut result = Vec::new();
    collect_outermost_bands(node, &mut result);
    result
}

fn collect_outermost_bands(node: &ScheduleNode, out: &mut Vec<ScheduleNode>) {
    if node.get_type() == ScheduleNodeType::Band {
        out.push(node.copy());
        return;
    }
    let n = node.n_children();
    for i in 0..n {
        collect_outermost_bands(&node.copy().child(i), out);
    }
}

/// True when at least one member of the band is marked coincident.
pub fn has_coincident_member(band: &ScheduleNode) -> bool {
    let n = band.band_n_member();
    (0..n).any(|i| band.band_member_get_coincident(i))
}

/// Number of leading band members that will be mapped to block/thread
/// identifiers: at most `MAX_MAPPED_DIMS` and at most the member count.
pub fn mapped_dims(band: &ScheduleNode) -> usize {
    (band.band_n_member() as usize).min(MAX_MAPPED_DIMS)
}

/// Splits off the first `pos` members of a band into their own node.
///
/// Returns the node unchanged when `pos` covers the whole band or nothing.
pub fn split_band(band: ScheduleNode, pos: usize) -> ScheduleNode {
    let n = band.band_n_member() as usize;
    if pos == 0 || pos >= n {
        return band;
    }
    debug!("splitting {}-member band at position {}", n, pos);
    isl_ext::band_split(band, pos as i32)
}

/// Tiles a band with the given per-member sizes. Sizes shorter than the band
/// are padded with 1 (no tiling for that member).
///
/// The result points at the tile band; its child is the point band. The tile
/// band enumerates block coordinates and must stay in block units, so
/// tile-loop scaling is forced off here whatever the ambient options say;
/// point loops are always shifted to start at zero.
pub fn tile_band(ctx: &Context, band: ScheduleNode, sizes: &[i64]) -> ScheduleNode {
    isl_ext::set_tile_options(ctx, false, true);

    let n = band.band_n_member();
    let space = band.band_get_space();

    let mut list = ValList::alloc(ctx, n);
    for i in 0..n as usize {
        let size = sizes.get(i).copied().unwrap_or(1).max(1);
        list = list.add(Val::int_from_si(ctx, size));
    }
    let multi_val = MultiVal::from_val_list(space, list);

    band.band_tile(multi_val)
}

/// Scales each band member by the matching factor: member `d` becomes
/// `f_d * S_d`. Factors shorter than the band leave the tail unscaled.
pub fn scale_band(ctx: &Context, band: ScheduleNode, factors: &[i64]) -> ScheduleNode {
    let partial = band.band_get_partial_schedule();
    let n = partial.size();
    let space = partial.get_space();
    let mut scaled = MultiUnionPwAff::zero(space);

    for i in 0..n {
        let member = partial.get_at(i);
        let f = factors.get(i as usize).copied().unwrap_or(1);
        let member = if f != 1 {
            member.scale_val(Val::int_from_si(ctx, f))
        } else {
            member
        };
        scaled = scaled.set_at(i, member);
    }

    isl_ext::band_replace_partial_schedule(band, scaled)
}

/// Snaps each band member down to a multiple boundary: member `d` becomes
/// `floor(S_d / f_d)`, or `f_d * floor(S_d / f_d)` when `rescale` is set.
///
/// Members with factor 1 are left untouched in both modes.
pub fn snap_band_to_sizes(
    ctx: &Context,
    band: ScheduleNode,
    factors: &[i64],
    rescale: bool,
) -> ScheduleNode {
    let partial = band.band_get_partial_schedule();
    let n = partial.size();
    let space = partial.get_space();
    let mut snapped = MultiUnionPwAff::zero(space);

    for i in 0..n {
        let member = partial.get_at(i);
        let f = factors.get(i as usize).copied().unwrap_or(1);
        let member = if f > 1 {
            let floored = member
                .scale_down_val(Val::int_from_si(ctx, f))
                .floor();
            if rescale {
                floored.scale_val(Val::int_from_si(ctx, f))
            } else {
                floored
            }
        } else {
            member
        };
        snapped = snapped.set_at(i, member);
    }

    isl_ext::band_replace_partial_schedule(band, snapped)
}

/// Rewrites each of the first `n_map` members of a band to its residue modulo
/// the matching size: member `d` becomes `S_d mod m_d`. Used to turn a point
/// band into per-thread coordinates when block sizes are smaller than tiles.
pub fn wrap_band_members(
    ctx: &Context,
    band: ScheduleNode,
    sizes: &[i64],
    n_map: usize,
) -> ScheduleNode {
    let partial = band.band_get_partial_schedule();
    let n = partial.size();
    let space = partial.get_space();
    let mut wrapped = MultiUnionPwAff::zero(space);

    for i in 0..n {
        let member = partial.get_at(i);
        let member = if (i as usize) < n_map {
            let m = sizes.get(i as usize).copied().unwrap_or(1);
            if m > 1 {
                member.mod_val(Val::int_from_si(ctx, m))
            } else {
                member
            }
        } else {
            member
        };
        wrapped = wrapped.set_at(i, member);
    }

    isl_ext::band_replace_partial_schedule(band, wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isl_rs::Schedule;
    use std::sync::Arc;

    fn two_d_schedule(ctx: &Context) -> Schedule {
        Schedule::read_from_str(
            ctx,
            "{ domain: \"{ S[i, j] : 0 <= i < 64 and 0 <= j < 64 }\", \
               child: { schedule: \"[{ S[i, j] -> [(i)] }, { S[i, j] -> [(j)] }]\" } }",
        )
    }

    #[test]
    fn finds_the_band() {
        let ctx = Arc::new(Context::alloc());
        let schedule = two_d_schedule(&ctx);
        let band = find_first_band(&schedule.get_root()).unwrap();
        assert_eq!(band.band_n_member(), 2);
    }

    #[test]
    fn tile_then_point_band_exists() {
        let ctx = Arc::new(Context::alloc());
        let schedule = two_d_schedule(&ctx);
        let band = find_first_band(&schedule.get_root()).unwrap();
        let tiled = tile_band(&ctx, band, &[32, 32]);
        assert_eq!(tiled.get_type(), ScheduleNodeType::Band);
        assert_eq!(tiled.band_n_member(), 2);
        let point = tiled.child(0);
        assert_eq!(point.get_type(), ScheduleNodeType::Band);
        assert_eq!(point.band_n_member(), 2);
    }

    #[test]
    fn tiling_overrides_ambient_scaling() {
        let ctx = Arc::new(Context::alloc());
        crate::isl_ext::set_tile_options(&ctx, true, false);
        let schedule = two_d_schedule(&ctx);
        let band = find_first_band(&schedule.get_root()).unwrap();
        let tiled = tile_band(&ctx, band, &[32, 32]);
        let tile_partial = tiled.band_get_partial_schedule().to_str().to_string();
        assert!(tile_partial.contains("floor"), "not tiled: {}", tile_partial);
        assert!(
            !tile_partial.contains('*'),
            "tile band was rescaled: {}",
            tile_partial
        );
        let point_partial = tiled
            .child(0)
            .band_get_partial_schedule()
            .to_str()
            .to_string();
        assert!(
            point_partial.contains("mod"),
            "point band not shifted: {}",
            point_partial
        );
    }

    #[test]
    fn scale_by_one_is_identity() {
        let ctx = Arc::new(Context::alloc());
        let schedule = two_d_schedule(&ctx);
        let before = schedule.to_str().to_string();
        let band = find_first_band(&schedule.get_root()).unwrap();
        let scaled = scale_band(&ctx, band, &[1, 1]);
        assert_eq!(scaled.get_schedule().to_str().to_string(), before);
    }

    #[test]
    fn snap_without_rescale_divides() {
        let ctx = Arc::new(Context::alloc());
        let schedule = two_d_schedule(&ctx);
        let band = find_first_band(&schedule.get_root()).unwrap();
        let snapped = snap_band_to_sizes(&ctx, band, &[16, 1], false);
        let text = snapped.get_schedule().to_str().to_string();
        assert!(text.contains("floor"), "expected a floor term in {}", text);
    }

    #[test]
    fn snap_with_rescale_keeps_multiples() {
        let ctx = Arc::new(Context::alloc());
        let schedule = two_d_schedule(&ctx);
        let band = find_first_band(&schedule.get_root()).unwrap();
        let snapped = snap_band_to_sizes(&ctx, band, &[16, 1], true);
        let text = snapped.get_schedule().to_str().to_string();
        assert!(text.contains("16"), "expected the factor in {}", text);
    }

    #[test]
    fn split_partitions_members() {
        let ctx = Arc::new(Context::alloc());
        let schedule = two_d_schedule(&ctx);
        let band = find_first_band(&schedule.get_root()).unwrap();
        let outer = split_band(band, 1);
        assert_eq!(outer.band_n_member(), 1);
        let inner = outer.child(0);
        assert_eq!(inner.get_type(), ScheduleNodeType::Band);
        assert_eq!(inner.band_n_member(), 1);
    }
}
