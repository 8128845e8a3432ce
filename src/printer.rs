//! Printer boundary.
//!
//! Code emission is an external collaborator; callers hand each finished
//! kernel to a `KernelPrinter` of their choosing. The plain-text
//! implementation below serves the CLI and the tests.

use crate::group::Promotion;
use crate::kernel::Kernel;
use crate::launch::GridExtent;
use crate::scop::ArrayInfo;
use isl_rs::Schedule;
use std::fmt::Write;

/// Consumer of finished kernels.
pub trait KernelPrinter {
    fn print_kernel(
        &mut self,
        kernel: &Kernel,
        schedule: &Schedule,
        arrays: &[ArrayInfo],
    ) -> Result<String, std::fmt::Error>;
}

/// Renders kernel metadata as indented plain text.
#[derive(Default)]
pub struct PlainTextPrinter;

impl KernelPrinter for PlainTextPrinter {
    fn print_kernel(
        &mut self,
        kernel: &Kernel,
        _schedule: &Schedule,
        arrays: &[ArrayInfo],
    ) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        writeln!(out, "kernel {}", kernel.id)?;

        if let Some(geo) = &kernel.geometry {
            let grid: Vec<String> = geo
                .grid
                .iter()
                .map(|g| match g {
                    GridExtent::Fixed(n) => n.to_string(),
                    GridExtent::Param { expr, cap } => format!("min({}, {})", expr, cap),
                })
                .collect();
            writeln!(out, "  grid: ({})", grid.join(", "))?;
            let block: Vec<String> = geo.block.iter().map(|b| b.to_string()).collect();
            writeln!(out, "  block: ({})", block.join(", "))?;
        }

        for la in &kernel.local_arrays {
            let element_size = arrays
                .iter()
                .find(|a| a.name == la.array)
                .map(|a| a.element_size)
                .unwrap_or(0);
            if !la.bounds.is_empty() {
                writeln!(out, "  array {} [{}]", la.array, la.bounds.join(" x "))?;
            }
            for g in &la.groups {
                let (space, tile) = match g.promotion() {
                    Promotion::Private => ("private", &g.private_tile),
                    Promotion::Shared => ("shared", &g.shared_tile),
                    Promotion::Global => ("global", &None),
                };
                match tile {
                    Some(t) => writeln!(
                        out,
                        "  {} {} [{} x {} bytes]",
                        space,
                        g.local_name(la.groups.len()),
                        t.total_elements(),
                        element_size
                    )?,
                    None => writeln!(out, "  {} {}", space, g.local_name(la.groups.len()))?,
                }
            }
        }

        if let Some(sync) = &kernel.sync {
            if !sync.is_empty() {
                writeln!(out, "  barrier after {} write reference(s)", sync.writes.len())?;
            }
        }

        Ok(out)
    }
}
