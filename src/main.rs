//! Polygrid CLI.
//!
//! Loads a scop description, runs kernel synthesis and prints the per-kernel
//! report plus the rewritten schedule tree.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin polygrid -- synthesize \
//!   --input matmul.scop \
//!   --tile 32,32 \
//!   --verbose
//! ```

use clap::{Parser, Subcommand};
use isl_rs::Context;
use polygrid::config::{SizeSpec, SynthesisConfig};
use polygrid::pipeline::KernelSynthesizer;
use polygrid::printer::{KernelPrinter, PlainTextPrinter};
use polygrid::scop::read_scop_file;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[clap(name = "polygrid")]
#[clap(about = "Polygrid - device-kernel synthesis for polyhedral schedule trees")]
#[clap(version = "0.1")]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize device kernels from a scop description file
    Synthesize {
        /// Scop description (domain/schedule/accesses as ISL strings)
        #[clap(long = "input", short = 'i', value_name = "FILE")]
        input: PathBuf,

        /// Tile sizes per dimension, comma separated
        #[clap(long = "tile", value_name = "N,N,...", value_delimiter = ',')]
        tile: Vec<i64>,

        /// Block sizes per dimension, comma separated (default: tile sizes)
        #[clap(long = "block", value_name = "N,N,...", value_delimiter = ',')]
        block: Vec<i64>,

        /// Nominal grid extents per dimension, comma separated
        #[clap(long = "grid", value_name = "N,N,...", value_delimiter = ',')]
        grid: Vec<i64>,

        /// Only map bands with at least one coincident member
        #[clap(long = "require-coincident")]
        require_coincident: bool,

        /// Leave every reference group in global memory
        #[clap(long = "no-promotion")]
        no_promotion: bool,

        /// Print the rewritten schedule tree as well
        #[clap(long = "verbose", short = 'v')]
        verbose: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Synthesize {
            input,
            tile,
            block,
            grid,
            require_coincident,
            no_promotion,
            verbose,
        } => {
            let ctx = Arc::new(Context::alloc());
            let scop = read_scop_file(ctx.clone(), &input)?;

            let defaults = SizeSpec::default();
            let sizes = SizeSpec {
                tile: if tile.is_empty() { defaults.tile } else { tile },
                block,
                grid: if grid.is_empty() { defaults.grid } else { grid },
            };
            let config = SynthesisConfig {
                sizes,
                require_coincident,
                scale_tile_loops: false,
                disable_promotion: no_promotion,
            };

            let synthesizer = KernelSynthesizer::new(ctx, config)?;
            let result = synthesizer.synthesize(&scop)?;

            println!("synthesized {} kernel(s)", result.kernels.len());
            let mut printer = PlainTextPrinter;
            for kernel in &result.kernels {
                print!(
                    "{}",
                    printer.print_kernel(kernel, &result.schedule, &scop.arrays)?
                );
            }

            if verbose {
                println!("\nschedule:");
                println!("{}", result.schedule.to_str());
            }
        }
    }

    Ok(())
}
