//! Tile shapes for promoted array reference groups.
//!
//! A tile describes, per array dimension, the rectangular footprint a group
//! touches relative to a schedule prefix: an affine lower bound in the outer
//! schedule coordinates, a constant extent, and a stride. The solver asks ISL
//! for the simple fixed-box hull of the access range; when no such box exists
//! the group cannot be promoted at that depth.

use crate::isl_ext;
use isl_rs::Map;
use log::trace;

/// Footprint of one array dimension relative to the schedule prefix.
#[derive(Clone, Debug)]
pub struct TileDim {
    /// Affine lower bound as a function of the outer schedule coordinates.
    pub lower_bound: String,

    /// Constant number of elements covered along this dimension.
    pub extent: i64,

    /// Distance between consecutive accessed elements; 1 when dense.
    pub stride: i64,
}

/// Rectangular footprint of a reference group at a schedule depth.
#[derive(Clone, Debug)]
pub struct ArrayTile {
    /// Number of outer schedule dimensions the bounds may refer to.
    pub depth: usize,

    pub dims: Vec<TileDim>,
}

impl ArrayTile {
    /// Tile with zero extent in every dimension; the shape of an empty
    /// access set.
    pub fn empty(depth: usize, n_index: usize) -> ArrayTile {
        ArrayTile {
            depth,
            dims: (0..n_index)
                .map(|_| TileDim {
                    lower_bound: String::new(),
                    extent: 0,
                    stride: 1,
                })
                .collect(),
        }
    }

    /// Number of elements the tile stores, after dividing out strides.
    pub fn total_elements(&self) -> i64 {
        self.dims
            .iter()
            .map(|d| {
                if d.extent == 0 {
                    0
                } else {
                    (d.extent + d.stride - 1) / d.stride
                }
            })
            .product()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|d| d.extent == 0)
    }
}

/// Solves for the tile of `access` at `depth` outer schedule dimensions.
///
/// `access` maps schedule prefixes of length `depth` to array elements.
/// Returns `None` when the footprint has no fixed rectangular bound, which
/// callers treat as "promotion not possible at this depth".
pub fn compute_tile(access: &Map, depth: usize) -> Option<ArrayTile> {
    let n_index = access.dim(isl_rs::DimType::Out) as usize;

    if access.is_empty() {
        trace!("empty access relation; zero-extent tile at depth {}", depth);
        return Some(ArrayTile::empty(depth, n_index));
    }

    let box_ = isl_ext::range_fixed_box(access)?;
    if box_.sizes.len() != n_index || box_.offsets.len() != n_index {
        return None;
    }

    let range = access.copy().range();
    let mut dims = Vec::with_capacity(n_index);
    for d in 0..n_index {
        let stride = isl_ext::set_stride(&range, d as i32);
        dims.push(TileDim {
            lower_bound: box_.offsets[d].clone(),
            extent: box_.sizes[d],
            stride,
        });
    }

    Some(ArrayTile { depth, dims })
}
