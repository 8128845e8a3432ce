//! Synthesis configuration.
//!
//! All tunables travel through the pipeline as an explicit `&SynthesisConfig`;
//! nothing is stored in ambient global state. The requested sizes live here,
//! the *effective* sizes actually applied to each kernel are recorded on the
//! kernel itself so diagnostics can show both.

/// Requested tile/grid/block sizes for one kernel, before clamping.
#[derive(Clone, Debug)]
pub struct SizeSpec {
    /// Tile size per band dimension; missing entries fall back to
    /// `DEFAULT_TILE_SIZE`.
    pub tile: Vec<i64>,

    /// Block dimensions per mapped dimension; missing entries fall back to
    /// the tile size of the same dimension.
    pub block: Vec<i64>,

    /// Nominal grid extents; the computed grid never exceeds these.
    pub grid: Vec<i64>,
}

pub const DEFAULT_TILE_SIZE: i64 = 32;
pub const DEFAULT_GRID_EXTENT: i64 = 32768;

/// Maximum number of band members mapped to block/thread identifiers.
pub const MAX_MAPPED_DIMS: usize = 3;

impl Default for SizeSpec {
    fn default() -> Self {
        SizeSpec {
            tile: vec![DEFAULT_TILE_SIZE; MAX_MAPPED_DIMS],
            block: Vec::new(),
            grid: vec![DEFAULT_GRID_EXTENT; MAX_MAPPED_DIMS],
        }
    }
}

impl SizeSpec {
    /// Requested tile size for dimension `d`, with the documented fallback.
    pub fn tile_size(&self, d: usize) -> i64 {
        self.tile
            .get(d)
            .copied()
            .or_else(|| self.tile.last().copied())
            .unwrap_or(DEFAULT_TILE_SIZE)
    }

    /// Requested block size for dimension `d`; defaults to the tile size so
    /// each thread handles one tile element unless told otherwise.
    pub fn block_size(&self, d: usize) -> i64 {
        self.block.get(d).copied().unwrap_or_else(|| self.tile_size(d))
    }

    /// Nominal grid extent for dimension `d`.
    pub fn grid_extent(&self, d: usize) -> i64 {
        self.grid.get(d).copied().unwrap_or(DEFAULT_GRID_EXTENT)
    }
}

/// Configuration for a whole synthesis run.
#[derive(Clone, Debug)]
pub struct SynthesisConfig {
    /// Per-kernel size specification. A single spec applies to all kernels;
    /// per-kernel overrides are keyed by kernel sequence id.
    pub sizes: SizeSpec,

    /// When set, only bands with at least one coincident member become
    /// kernels. Off by default because schedules read from text files carry
    /// no coincidence information.
    pub require_coincident: bool,

    /// Re-multiply snapped bands by their factor (`f * floor(S/f)` instead of
    /// `floor(S/f)`).
    pub scale_tile_loops: bool,

    /// Skip promotion entirely and leave every group in global memory.
    pub disable_promotion: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            sizes: SizeSpec::default(),
            require_coincident: false,
            scale_tile_loops: false,
            disable_promotion: false,
        }
    }
}
