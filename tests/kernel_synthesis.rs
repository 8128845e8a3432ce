//! End-to-end kernel synthesis tests.
//!
//! Every test here parses a real scop description, runs the full pipeline
//! and checks the resulting kernels and schedule tree. No stage is mocked;
//! all polyhedral reasoning is executed through ISL.

use isl_rs::Context;
use polygrid::config::{SizeSpec, SynthesisConfig, DEFAULT_GRID_EXTENT};
use polygrid::group::Promotion;
use polygrid::launch::GridExtent;
use polygrid::pipeline::KernelSynthesizer;
use polygrid::scop::parse_scop_description;
use polygrid::{Kernel, KernelStage, SynthesisResult};
use std::sync::Arc;

// ============================================================================
// Helpers
// ============================================================================

fn run(ctx: &Arc<Context>, description: &str, config: SynthesisConfig) -> SynthesisResult {
    let scop = parse_scop_description(ctx.clone(), description).unwrap();
    KernelSynthesizer::new(ctx.clone(), config)
        .unwrap()
        .synthesize(&scop)
        .unwrap()
}

fn only_kernel(result: &SynthesisResult) -> &Kernel {
    assert_eq!(result.kernels.len(), 1);
    &result.kernels[0]
}

fn promotion_of(kernel: &Kernel, array: &str) -> Promotion {
    let la = kernel
        .local_arrays
        .iter()
        .find(|la| la.array == array)
        .unwrap_or_else(|| panic!("no groups for array {}", array));
    assert_eq!(la.groups.len(), 1, "expected one group for {}", array);
    la.groups[0].promotion()
}

// ============================================================================
// Launch geometry
// ============================================================================

#[test]
fn fixed_bounds_give_fixed_grid_and_block() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: { S[i, j] : 0 <= i < 64 and 0 <= j < 96 }\n\
         schedule: { domain: \"{ S[i, j] : 0 <= i < 64 and 0 <= j < 96 }\", \
                     child: { schedule: \"[{ S[i, j] -> [(i)] }, { S[i, j] -> [(j)] }]\" } }\n\
         write: { S[i, j] -> A[i, j] }\n\
         array: A 4 64 96\n",
        SynthesisConfig::default(),
    );
    let k = only_kernel(&result);
    assert_eq!(k.stage, KernelStage::Final);
    let geo = k.geometry.as_ref().unwrap();
    assert_eq!(geo.grid, vec![GridExtent::Fixed(2), GridExtent::Fixed(3)]);
    assert_eq!(geo.block, vec![32, 32]);
    assert_eq!(k.block_ids, vec!["b0".to_string(), "b1".to_string()]);
    assert_eq!(k.thread_ids, vec!["t0".to_string(), "t1".to_string()]);
    // Declared extents survive on the kernel's array view.
    let a = k.local_arrays.iter().find(|la| la.array == "A").unwrap();
    assert_eq!(a.bounds, vec!["64".to_string(), "96".to_string()]);
}

#[test]
fn parametric_bounds_give_parametric_grid() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: [N] -> { S[i, j] : 0 <= i < N and 0 <= j < N }\n\
         context: [N] -> { : N >= 1 }\n\
         schedule: { domain: \"[N] -> { S[i, j] : 0 <= i < N and 0 <= j < N }\", \
                     child: { schedule: \"[{ S[i, j] -> [(i)] }, { S[i, j] -> [(j)] }]\" } }\n\
         write: { S[i, j] -> A[i, j] }\n\
         array: A 4 N N\n",
        SynthesisConfig::default(),
    );
    let k = only_kernel(&result);
    let geo = k.geometry.as_ref().unwrap();
    assert_eq!(geo.block, vec![32, 32]);
    for extent in &geo.grid {
        match extent {
            GridExtent::Param { expr, cap } => {
                assert!(expr.contains("N"), "parametric extent misses N: {}", expr);
                assert!(expr.contains("floor"), "extent not a block count: {}", expr);
                assert_eq!(*cap, DEFAULT_GRID_EXTENT);
            }
            GridExtent::Fixed(n) => panic!("expected parametric extent, got {}", n),
        }
    }
    let a = k.local_arrays.iter().find(|la| la.array == "A").unwrap();
    for bound in &a.bounds {
        assert!(bound.contains("N"), "bound lost its parameter: {}", bound);
    }
    // The launch is guarded on the parameter.
    let text = result.schedule.to_str().to_string();
    assert!(text.contains("guard"), "no guard node in {}", text);
}

#[test]
fn parametric_grid_carries_the_nominal_cap() {
    let ctx = Arc::new(Context::alloc());
    let config = SynthesisConfig {
        sizes: SizeSpec {
            tile: vec![32],
            block: Vec::new(),
            grid: vec![4],
        },
        ..SynthesisConfig::default()
    };
    let result = run(
        &ctx,
        "domain: [N] -> { S[i] : 0 <= i < N }\n\
         context: [N] -> { : N >= 1 }\n\
         schedule: { domain: \"[N] -> { S[i] : 0 <= i < N }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n",
        config,
    );
    let geo = only_kernel(&result).geometry.as_ref().unwrap();
    match &geo.grid[0] {
        GridExtent::Param { cap, .. } => assert_eq!(*cap, 4),
        other => panic!("expected parametric extent, got {:?}", other),
    }
    // The context node keeps the block identifier below the cap.
    let text = result.schedule.to_str().to_string();
    assert!(text.contains("b0 <= 3"), "cap missing from context: {}", text);
}

#[test]
fn grid_is_capped_at_the_nominal_extent() {
    let ctx = Arc::new(Context::alloc());
    let config = SynthesisConfig {
        sizes: SizeSpec {
            tile: vec![1],
            block: vec![1],
            grid: vec![4],
        },
        ..SynthesisConfig::default()
    };
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n",
        config,
    );
    let geo = only_kernel(&result).geometry.as_ref().unwrap();
    // 64 blocks are reachable but the nominal grid only has 4.
    assert_eq!(geo.grid, vec![GridExtent::Fixed(4)]);
}

// ============================================================================
// Promotion
// ============================================================================

#[test]
fn promotion_picks_the_most_local_space_per_group() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n\
         write: { S[i] -> B[a] : exists b : a = 32b and 32b <= i < 32b + 32 }\n\
         write: { S[i] -> C[a] : 0 <= a <= i }\n",
        SynthesisConfig::default(),
    );
    let k = only_kernel(&result);
    // One element per thread, never observed by another thread.
    assert_eq!(promotion_of(k, "A"), Promotion::Private);
    // Threads of a block share one element; the block footprint is fixed.
    assert_eq!(promotion_of(k, "B"), Promotion::Shared);
    // The footprint grows with i, no fixed bound at any depth.
    assert_eq!(promotion_of(k, "C"), Promotion::Global);
    let c = k.local_arrays.iter().find(|la| la.array == "C").unwrap();
    assert!(c.global);
}

#[test]
fn disabled_promotion_leaves_everything_global() {
    let ctx = Arc::new(Context::alloc());
    let config = SynthesisConfig {
        disable_promotion: true,
        ..SynthesisConfig::default()
    };
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n",
        config,
    );
    assert_eq!(promotion_of(only_kernel(&result), "A"), Promotion::Global);
}

// ============================================================================
// Synchronization
// ============================================================================

#[test]
fn cross_thread_flow_inserts_a_barrier() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n\
         read: { S[i] -> A[i - 1] : i > 0 }\n",
        SynthesisConfig::default(),
    );
    let k = only_kernel(&result);
    let sync = k.sync.as_ref().unwrap();
    assert!(!sync.is_empty());
    assert_eq!(sync.writes, vec![0]);
    let text = result.schedule.to_str().to_string();
    assert!(text.contains("barrier"), "no barrier mark in {}", text);
}

#[test]
fn thread_private_data_needs_no_barrier() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n\
         read: { S[i] -> A[i] }\n",
        SynthesisConfig::default(),
    );
    let k = only_kernel(&result);
    assert!(k.sync.as_ref().unwrap().is_empty());
    let text = result.schedule.to_str().to_string();
    assert!(!text.contains("barrier"), "spurious barrier in {}", text);
}

// ============================================================================
// Tree shape and kernel discovery
// ============================================================================

#[test]
fn rewritten_tree_nests_guard_context_filter_band() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n",
        SynthesisConfig::default(),
    );
    let text = result.schedule.to_str().to_string();
    let guard = text.find("guard").expect("no guard node");
    let context = text.find("context").expect("no context node");
    let filter = text.find("filter").expect("no filter node");
    let band = text.find("schedule").expect("no band node");
    assert!(guard < context, "guard not above context: {}", text);
    assert!(context < filter, "context not above filter: {}", text);
    assert!(filter < band, "filter not above band: {}", text);
}

#[test]
fn sibling_bands_become_separate_kernels() {
    let ctx = Arc::new(Context::alloc());
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64; T[i] : 0 <= i < 32 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64; T[i] : 0 <= i < 32 }\", \
                     child: { sequence: [ \
                       { filter: \"{ S[i] }\", \
                         child: { schedule: \"[{ S[i] -> [(i)] }]\" } }, \
                       { filter: \"{ T[i] }\", \
                         child: { schedule: \"[{ T[i] -> [(i)] }]\" } } ] } }\n\
         write: { S[i] -> A[i] }\n\
         write: { T[i] -> B[i] }\n",
        SynthesisConfig::default(),
    );
    assert_eq!(result.kernels.len(), 2);
    assert_eq!(result.kernels[0].id, 0);
    assert_eq!(result.kernels[1].id, 1);
    let a = result.kernels[0].geometry.as_ref().unwrap();
    let b = result.kernels[1].geometry.as_ref().unwrap();
    assert_eq!(a.grid, vec![GridExtent::Fixed(2)]);
    assert_eq!(b.grid, vec![GridExtent::Fixed(1)]);
}

#[test]
fn non_coincident_bands_are_skipped_when_required() {
    let ctx = Arc::new(Context::alloc());
    let config = SynthesisConfig {
        require_coincident: true,
        ..SynthesisConfig::default()
    };
    // No coincident flag is set on the band, so nothing is mapped.
    let result = run(
        &ctx,
        "domain: { S[i] : 0 <= i < 64 }\n\
         schedule: { domain: \"{ S[i] : 0 <= i < 64 }\", \
                     child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n\
         write: { S[i] -> A[i] }\n",
        config,
    );
    assert!(result.kernels.is_empty());
}
