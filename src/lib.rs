//! Polygrid: device-kernel synthesis for polyhedral schedule trees.
//!
//! Takes an iteration domain, access relations and a schedule tree, and
//! rewrites the tree into host-plus-kernel form: each outermost tilable band
//! becomes a launch unit with block/thread identifier filters, a launch
//! context, a non-empty-launch guard, promoted local arrays and barrier
//! marks where threads of a block must synchronize.
//!
//! # Pipeline Flow
//! ```text
//! scop description → kernel extraction → geometry sizing → grouping &
//! promotion → band tiling → synchronization analysis → context/guard →
//! rewritten schedule + per-kernel metadata
//! ```
//!
//! # Module Organization
//!
//! ## Input & Configuration
//! - [`scop`]: scop input model (domain, access relations, arrays)
//! - [`config`]: synthesis configuration and size defaults
//!
//! ## Analysis
//! - [`group`]: access classification, overlap resolution, promotion
//! - [`tile`]: tile bound solving (footprint boxes per group)
//! - [`sync`]: synchronization analysis (barrier placement)
//!
//! ## Schedule Construction
//! - [`band`]: band transformations (split, tile, scale, snap)
//! - [`launch`]: launch geometry (grid extents, block dims)
//! - [`context_guard`]: launch context and guard nodes
//! - [`kernel`]: per-kernel state, stage machine, identifier filters
//! - [`pipeline`]: orchestration and error taxonomy
//!
//! ## Boundaries
//! - [`printer`]: kernel printer trait and plain-text implementation
//! - [`isl_ext`]: ISL FFI extensions beyond the published bindings

// ============================================================================
// Input & Configuration
// ============================================================================

pub mod config;
pub mod scop;

// ============================================================================
// Analysis
// ============================================================================

pub mod group;
pub mod sync;
pub mod tile;

// ============================================================================
// Schedule Construction
// ============================================================================

pub mod band;
pub mod context_guard;
pub mod kernel;
pub mod launch;
pub mod pipeline;

// ============================================================================
// Boundaries
// ============================================================================

pub mod isl_ext;
pub mod printer;

pub use config::{SizeSpec, SynthesisConfig};
pub use group::{ArrayReferenceGroup, Promotion};
pub use kernel::{Kernel, KernelStage, LocalArrayInfo};
pub use launch::{GridExtent, LaunchGeometry};
pub use pipeline::{KernelSynthesizer, SynthesisError, SynthesisResult};
pub use printer::{KernelPrinter, PlainTextPrinter};
pub use scop::{read_scop_file, ArrayInfo, Scop, ScopError, StmtAccess};
pub use tile::ArrayTile;
