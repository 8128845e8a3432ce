//! Launch geometry: grid extents and block dimensions per kernel.
//!
//! The grid is sized from the actual set of non-empty blocks, never the
//! nominal configuration: each extent is the maximum block coordinate
//! reached by the scheduled domain, plus one, capped at the nominal size.
//! Constant extents are extracted by projecting the block-coordinate set to
//! one dimension and sampling its lexicographic maximum; parametric extents
//! are rendered as affine expressions over the parameters and carry the
//! nominal size as an explicit cap.

use crate::config::SizeSpec;
use crate::isl_ext;
use isl_rs::{DimType, Set};
use log::debug;

/// Size of one grid dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GridExtent {
    Fixed(i64),

    /// Affine expression over the parameters (max block coordinate plus
    /// one), for domains whose extent depends on a parameter. The effective
    /// extent is the smaller of `expr` and `cap`.
    Param { expr: String, cap: i64 },
}

/// Effective launch configuration of one kernel.
#[derive(Clone, Debug)]
pub struct LaunchGeometry {
    /// One extent per block identifier.
    pub grid: Vec<GridExtent>,

    /// Threads per block, one entry per thread identifier.
    pub block: Vec<i64>,

    /// Tile sizes actually applied to the band.
    pub tile: Vec<i64>,
}

impl LaunchGeometry {
    pub fn n_grid(&self) -> usize {
        self.grid.len()
    }
}

/// Resolves the requested sizes against a band with `n_members` members.
///
/// Returns the effective tile sizes (one per member; members beyond the
/// mapped dimensions are not tiled) and block sizes (one per mapped
/// dimension, never larger than the tile of that dimension).
pub fn effective_sizes(n_members: usize, n_map: usize, sizes: &SizeSpec) -> (Vec<i64>, Vec<i64>) {
    let tile: Vec<i64> = (0..n_members)
        .map(|d| if d < n_map { sizes.tile_size(d).max(1) } else { 1 })
        .collect();
    let block: Vec<i64> = (0..n_map)
        .map(|d| sizes.block_size(d).clamp(1, tile[d]))
        .collect();
    (tile, block)
}

/// Computes grid extents from the set of block coordinates actually reached.
///
/// `blocks` holds one point per scheduled block, one dimension per block
/// identifier. Empty sets give zero extents; the guard will then eliminate
/// the launch.
pub fn compute_grid(blocks: &Set, n_grid: usize, sizes: &SizeSpec) -> Vec<GridExtent> {
    let mut grid = Vec::with_capacity(n_grid);
    for d in 0..n_grid {
        let extent = grid_extent(blocks, d, n_grid, sizes.grid_extent(d));
        debug!("grid dimension {}: {:?}", d, extent);
        grid.push(extent);
    }
    grid
}

fn grid_extent(blocks: &Set, d: usize, n_grid: usize, nominal: i64) -> GridExtent {
    // Isolate dimension d.
    let proj = blocks.copy();
    let proj = if d > 0 {
        proj.project_out(DimType::Set, 0, d as u32)
    } else {
        proj
    };
    let remaining = n_grid - d - 1;
    let proj = if remaining > 0 {
        proj.project_out(DimType::Set, 1, remaining as u32)
    } else {
        proj
    };

    if proj.is_empty() {
        return GridExtent::Fixed(0);
    }

    if !isl_ext::set_involves_params(&proj) {
        let max_point = proj.copy().lexmax().sample_point();
        if !max_point.is_void() {
            let coord = max_point.get_coordinate_val(DimType::Set, 0);
            if coord.is_int() {
                return GridExtent::Fixed((coord.get_num_si() + 1).min(nominal));
            }
        }
    }

    // Parametric extent: max coordinate + 1 over the parameters, carrying
    // the nominal size as a cap. A maximum with more than one piece has no
    // single affine rendering; the nominal size is the conservative extent
    // there (too many blocks launch empty, too few would drop instances).
    match isl_ext::set_dim_max_str(&proj, 0).as_deref().and_then(render_extent) {
        Some(expr) => GridExtent::Param { expr, cap: nominal },
        None => GridExtent::Fixed(nominal),
    }
}

/// Turns a rendered single-piece affine maximum into a size expression.
///
/// `isl_set_dim_max` prints e.g. `[N] -> { [(floor((N - 1)/32))] : N > 0 }`;
/// the affine body is extracted and `+ 1` appended. `None` when the text is
/// not of that shape.
fn render_extent(pw_aff: &str) -> Option<String> {
    let start = pw_aff.find("[(")?;
    let end = pw_aff[start..].find(")]")?;
    Some(format!("{} + 1", pw_aff[start + 2..start + end].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use isl_rs::Context;
    use std::sync::Arc;

    #[test]
    fn fixed_grid_from_block_set() {
        let ctx = Arc::new(Context::alloc());
        let blocks = Set::read_from_str(&ctx, "{ [b0, b1] : 0 <= b0 < 2 and 0 <= b1 < 4 }");
        let grid = compute_grid(&blocks, 2, &SizeSpec::default());
        assert_eq!(grid, vec![GridExtent::Fixed(2), GridExtent::Fixed(4)]);
    }

    #[test]
    fn grid_is_capped_at_nominal() {
        let ctx = Arc::new(Context::alloc());
        let blocks = Set::read_from_str(&ctx, "{ [b] : 0 <= b < 100 }");
        let sizes = SizeSpec {
            grid: vec![16],
            ..SizeSpec::default()
        };
        let grid = compute_grid(&blocks, 1, &sizes);
        assert_eq!(grid, vec![GridExtent::Fixed(16)]);
    }

    #[test]
    fn empty_blocks_give_zero_extent() {
        let ctx = Arc::new(Context::alloc());
        let blocks = Set::read_from_str(&ctx, "{ [b] : 1 = 0 }");
        let grid = compute_grid(&blocks, 1, &SizeSpec::default());
        assert_eq!(grid, vec![GridExtent::Fixed(0)]);
    }

    #[test]
    fn parametric_extent_is_rendered() {
        let ctx = Arc::new(Context::alloc());
        let blocks = Set::read_from_str(&ctx, "[N] -> { [b] : 0 <= 32b < N }");
        let grid = compute_grid(&blocks, 1, &SizeSpec::default());
        match &grid[0] {
            GridExtent::Param { expr, cap } => {
                assert!(expr.contains("floor"), "unexpected extent {}", expr);
                assert_eq!(*cap, crate::config::DEFAULT_GRID_EXTENT);
            }
            other => panic!("expected parametric extent, got {:?}", other),
        }
    }

    #[test]
    fn parametric_extent_carries_the_nominal_cap() {
        let ctx = Arc::new(Context::alloc());
        let blocks = Set::read_from_str(&ctx, "[N] -> { [b] : 0 <= 32b < N }");
        let sizes = SizeSpec {
            grid: vec![4],
            ..SizeSpec::default()
        };
        let grid = compute_grid(&blocks, 1, &sizes);
        match &grid[0] {
            GridExtent::Param { cap, .. } => assert_eq!(*cap, 4),
            other => panic!("expected parametric extent, got {:?}", other),
        }
    }

    #[test]
    fn multi_piece_maximum_falls_back_to_nominal() {
        let ctx = Arc::new(Context::alloc());
        // The maximum is min(floor((N-1)/32), floor((M-1)/32)): two pieces,
        // no single affine rendering.
        let blocks = Set::read_from_str(&ctx, "[N, M] -> { [b] : 0 <= 32b < N and 0 <= 32b < M }");
        let sizes = SizeSpec {
            grid: vec![64],
            ..SizeSpec::default()
        };
        let grid = compute_grid(&blocks, 1, &sizes);
        assert_eq!(grid, vec![GridExtent::Fixed(64)]);
    }

    #[test]
    fn block_never_exceeds_tile() {
        let sizes = SizeSpec {
            tile: vec![16, 16],
            block: vec![32, 8],
            grid: Vec::new(),
        };
        let (tile, block) = effective_sizes(2, 2, &sizes);
        assert_eq!(tile, vec![16, 16]);
        assert_eq!(block, vec![16, 8]);
    }
}
