//! mesh-register: command-line surface mesh registration.
//!
//! Registers a floating OBJ mesh onto a target OBJ mesh and writes the
//! deformed floating mesh back out, preserving its vertex order and count.
//!
//! # Logging
//!
//! Set `RUST_LOG` to control log output, or use `-v`/`-vv`/`-vvv`:
//!
//! ```bash
//! RUST_LOG=mesh_register=debug mesh-register register scan.obj template.obj -o out.obj
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;

use commands::{decimate, register, rigid};

/// mesh-register - rigid and non-rigid surface mesh registration.
#[derive(Parser)]
#[command(name = "mesh-register")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Non-rigidly register a floating mesh onto a target (pyramid scheme)
    Register {
        /// Floating mesh (the mesh that is deformed)
        floating: PathBuf,

        /// Target mesh (the fixed mesh registered onto)
        target: PathBuf,

        /// Output file for the deformed floating mesh
        #[arg(short, long)]
        output: PathBuf,

        /// Total non-rigid iterations, divided across pyramid levels
        #[arg(long, default_value = "60")]
        iterations: usize,

        /// Number of pyramid levels
        #[arg(long, default_value = "3")]
        layers: usize,

        /// Percent decimation at the coarsest level
        #[arg(long, default_value = "90")]
        downsample_start: f64,

        /// Gaussian smoothing sigma, in world units
        #[arg(long, default_value = "3.0")]
        sigma: f64,

        /// Use one-way instead of symmetric correspondences
        #[arg(long)]
        asymmetric: bool,

        /// Skip the pyramid and run a single full-resolution loop
        #[arg(long)]
        no_pyramid: bool,
    },

    /// Rigidly align a floating mesh onto a target
    Rigid {
        /// Floating mesh
        floating: PathBuf,

        /// Target mesh
        target: PathBuf,

        /// Output file for the aligned floating mesh
        #[arg(short, long)]
        output: PathBuf,

        /// Number of iterations
        #[arg(long, default_value = "20")]
        iterations: usize,

        /// Estimate a uniform scale as well
        #[arg(long)]
        scaling: bool,
    },

    /// Downsample a mesh by quadric edge collapse
    Decimate {
        /// Input mesh
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Fraction of vertices to remove (0.0-1.0)
        #[arg(long, default_value = "0.5")]
        ratio: f64,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_register=info",
            2 => "mesh_register=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Register {
            floating,
            target,
            output,
            iterations,
            layers,
            downsample_start,
            sigma,
            asymmetric,
            no_pyramid,
        } => register::run(
            floating,
            target,
            output,
            *iterations,
            *layers,
            *downsample_start,
            *sigma,
            *asymmetric,
            *no_pyramid,
            &cli,
        ),
        Commands::Rigid {
            floating,
            target,
            output,
            iterations,
            scaling,
        } => rigid::run(floating, target, output, *iterations, *scaling, &cli),
        Commands::Decimate {
            input,
            output,
            ratio,
        } => decimate::run(input, output, *ratio, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            eprintln!("{}: {}", "Error".red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  {}: {}", "Caused by".yellow(), cause);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
