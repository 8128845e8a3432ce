//! Context and guard construction around a kernel launch.
//!
//! The context node declares the block and thread identifiers as fresh
//! parameters together with their bounds, ahead of any use by the filters
//! below it. The guard eliminates launches that would start zero blocks.
//! Context-derived parameter constraints are folded into the guard only
//! while it remains a single conjunction; a constraint that would force a
//! disjunction is dropped silently.

use crate::isl_ext;
use crate::launch::{GridExtent, LaunchGeometry};
use isl_rs::{Context, ScheduleNode, Set, UnionSet};
use log::{debug, trace};

/// Parameter constraints that hold at the launch point: the parameter
/// projection of the kernel's statement instances, intersected with the
/// program-wide context.
pub fn extract_context(core: &UnionSet, program_context: &Set) -> Set {
    core.copy().params().intersect(program_context.copy())
}

/// Builds the context set declaring block/thread identifier parameters with
/// their bounds.
///
/// Fixed grid extents bound the block identifiers directly; parametric
/// extents bound them by their cap, the tighter parametric bound is enforced
/// by the guard.
pub fn build_launch_context(
    ctx: &Context,
    block_ids: &[String],
    thread_ids: &[String],
    geometry: &LaunchGeometry,
) -> Set {
    let mut params: Vec<&str> = Vec::new();
    params.extend(block_ids.iter().map(|s| s.as_str()));
    params.extend(thread_ids.iter().map(|s| s.as_str()));

    let mut constraints = Vec::new();
    for (d, b) in block_ids.iter().enumerate() {
        match &geometry.grid[d] {
            GridExtent::Fixed(n) => constraints.push(format!("0 <= {} < {}", b, n)),
            GridExtent::Param { cap, .. } => constraints.push(format!("0 <= {} < {}", b, cap)),
        }
    }
    for (d, t) in thread_ids.iter().enumerate() {
        constraints.push(format!("0 <= {} < {}", t, geometry.block[d]));
    }

    let text = format!("[{}] -> {{ : {} }}", params.join(", "), constraints.join(" and "));
    trace!("launch context: {}", text);
    Set::read_from_str(ctx, &text)
}

/// Inserts the context node above `node`.
pub fn insert_context(node: ScheduleNode, context: Set) -> ScheduleNode {
    isl_ext::insert_context(node, context)
}

/// Builds the launch guard: the launch happens only when every grid
/// dimension has at least one block.
///
/// Constraints from `kernel_context` are folded in while the combined guard
/// coalesces to a single conjunction; otherwise the plain non-empty-launch
/// guard is kept.
pub fn build_guard(ctx: &Context, geometry: &LaunchGeometry, kernel_context: &Set) -> Set {
    let mut constraints = Vec::new();
    for extent in &geometry.grid {
        match extent {
            GridExtent::Fixed(n) if *n <= 0 => constraints.push("1 = 0".to_string()),
            GridExtent::Fixed(_) => {}
            GridExtent::Param { cap, .. } if *cap <= 0 => constraints.push("1 = 0".to_string()),
            GridExtent::Param { expr, .. } => constraints.push(format!("{} >= 1", expr)),
        }
    }

    let guard = if constraints.is_empty() {
        Set::read_from_str(ctx, "{ : }")
    } else {
        let params = referenced_params(&constraints);
        let text = if params.is_empty() {
            format!("{{ : {} }}", constraints.join(" and "))
        } else {
            format!("[{}] -> {{ : {} }}", params.join(", "), constraints.join(" and "))
        };
        Set::read_from_str(ctx, &text)
    };

    let folded = guard.copy().intersect(kernel_context.copy()).coalesce();
    if isl_ext::set_n_basic_set(&folded) == 1 {
        debug!("guard absorbed kernel context constraints");
        folded
    } else {
        debug!("kernel context would split the guard; keeping it minimal");
        guard
    }
}

/// Inserts the guard node above `node`.
pub fn insert_guard(node: ScheduleNode, guard: Set) -> ScheduleNode {
    isl_ext::insert_guard(node, guard)
}

/// Re-renders a declared array extent with the launch-point parameter
/// constraints folded in.
///
/// `None` when the extent does not parse as an affine expression or stays
/// piecewise under the context; callers keep the declared text then.
pub fn localize_extent(ctx: &Context, extent: &str, kernel_context: &Set) -> Option<String> {
    let owned = [extent.to_string()];
    let params = referenced_params(&owned);
    let text = if params.is_empty() {
        format!("{{ [({})] }}", extent)
    } else {
        format!("[{}] -> {{ [({})] }}", params.join(", "), extent)
    };
    let gisted = isl_ext::pw_aff_gist_params_str(ctx, &text, kernel_context)?;
    pw_aff_body(&gisted)
}

/// Affine body of a rendered single-piece expression: the text between
/// `[(` and `)]`.
fn pw_aff_body(text: &str) -> Option<String> {
    let start = text.find("[(")?;
    let end = text[start..].find(")]")?;
    Some(text[start + 2..start + end].trim().to_string())
}

/// Identifiers appearing in the constraint expressions; these are the
/// parameters the guard set string has to declare.
fn referenced_params(constraints: &[String]) -> Vec<String> {
    const KEYWORDS: [&str; 8] = ["floor", "ceil", "mod", "and", "or", "not", "min", "max"];
    let mut params = Vec::new();
    for text in constraints {
        let mut word = String::new();
        for ch in text.chars().chain(std::iter::once(' ')) {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                continue;
            }
            let starts_alpha = word.chars().next().is_some_and(|c| !c.is_ascii_digit());
            if !word.is_empty()
                && starts_alpha
                && !KEYWORDS.contains(&word.as_str())
                && !params.contains(&word)
            {
                params.push(word.clone());
            }
            word.clear();
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use isl_rs::{Context, UnionSet};
    use std::sync::Arc;

    fn geometry(grid: Vec<GridExtent>, block: Vec<i64>) -> LaunchGeometry {
        LaunchGeometry {
            grid,
            block,
            tile: vec![32, 32],
        }
    }

    #[test]
    fn context_restricts_parameters() {
        let ctx = Arc::new(Context::alloc());
        let core = UnionSet::read_from_str(&ctx, "[N] -> { S[i] : 0 <= i < N and N >= 10 }");
        let program = Set::read_from_str(&ctx, "[N] -> { : N <= 100 }");
        let context = extract_context(&core, &program);
        let bound = Set::read_from_str(&ctx, "[N] -> { : 10 <= N <= 100 }");
        assert!(isl_ext::set_is_subset(&context, &bound));
    }

    #[test]
    fn launch_context_bounds_ids() {
        let ctx = Arc::new(Context::alloc());
        let geo = geometry(vec![GridExtent::Fixed(4)], vec![32]);
        let set = build_launch_context(&ctx, &["b0".into()], &["t0".into()], &geo);
        let expected = Set::read_from_str(&ctx, "[b0, t0] -> { : 0 <= b0 < 4 and 0 <= t0 < 32 }");
        assert!(isl_ext::set_is_equal(&set, &expected));
    }

    #[test]
    fn fixed_nonzero_grid_needs_no_guard() {
        let ctx = Arc::new(Context::alloc());
        let geo = geometry(vec![GridExtent::Fixed(2), GridExtent::Fixed(2)], vec![32, 32]);
        let kernel_context = Set::read_from_str(&ctx, "{ : }");
        let guard = build_guard(&ctx, &geo, &kernel_context);
        let universe = Set::read_from_str(&ctx, "{ : }");
        assert!(isl_ext::set_is_equal(&guard, &universe));
    }

    #[test]
    fn zero_grid_guard_is_unsatisfiable() {
        let ctx = Arc::new(Context::alloc());
        let geo = geometry(vec![GridExtent::Fixed(0)], vec![32]);
        let kernel_context = Set::read_from_str(&ctx, "{ : }");
        let guard = build_guard(&ctx, &geo, &kernel_context);
        assert!(guard.is_empty());
    }

    #[test]
    fn parametric_context_is_bounded_by_the_cap() {
        let ctx = Arc::new(Context::alloc());
        let geo = geometry(
            vec![GridExtent::Param {
                expr: "floor((N - 1)/32) + 1".to_string(),
                cap: 4,
            }],
            vec![32],
        );
        let set = build_launch_context(&ctx, &["b0".into()], &["t0".into()], &geo);
        let expected = Set::read_from_str(&ctx, "[b0, t0] -> { : 0 <= b0 < 4 and 0 <= t0 < 32 }");
        assert!(isl_ext::set_is_equal(&set, &expected));
    }

    #[test]
    fn extent_localization_keeps_parameters() {
        let ctx = Arc::new(Context::alloc());
        let kernel_context = Set::read_from_str(&ctx, "[N] -> { : N >= 1 }");
        let bound = localize_extent(&ctx, "N", &kernel_context).unwrap();
        assert!(bound.contains('N'), "unexpected bound {}", bound);
    }

    #[test]
    fn constant_extents_localize_to_themselves() {
        let ctx = Arc::new(Context::alloc());
        let kernel_context = Set::read_from_str(&ctx, "{ : }");
        assert_eq!(localize_extent(&ctx, "64", &kernel_context).unwrap(), "64");
    }

    #[test]
    fn parametric_guard_requires_one_block() {
        let ctx = Arc::new(Context::alloc());
        let geo = geometry(
            vec![GridExtent::Param {
                expr: "floor((N - 1)/32) + 1".to_string(),
                cap: 32768,
            }],
            vec![32],
        );
        let kernel_context = Set::read_from_str(&ctx, "[N] -> { : N >= 0 }");
        let guard = build_guard(&ctx, &geo, &kernel_context);
        // N = 0 gives zero blocks and must be rejected.
        assert!(guard
            .copy()
            .intersect(Set::read_from_str(&ctx, "[N] -> { : N = 0 }"))
            .is_empty());
        // N = 64 launches and must pass.
        assert!(!guard
            .intersect(Set::read_from_str(&ctx, "[N] -> { : N = 64 }"))
            .is_empty());
    }

    #[test]
    fn disjunctive_context_is_not_folded() {
        let ctx = Arc::new(Context::alloc());
        let geo = geometry(
            vec![GridExtent::Param {
                expr: "floor((N - 1)/32) + 1".to_string(),
                cap: 32768,
            }],
            vec![32],
        );
        // Either branch alone would make the guard a disjunction.
        let kernel_context = Set::read_from_str(&ctx, "[N] -> { : N < 0 or N > 100 }");
        let guard = build_guard(&ctx, &geo, &kernel_context);
        // The guard keeps only the non-empty-launch constraint.
        assert!(!guard
            .intersect(Set::read_from_str(&ctx, "[N] -> { : N = 50 }"))
            .is_empty());
    }
}
