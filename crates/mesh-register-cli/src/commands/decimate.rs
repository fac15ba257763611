//! mesh-register decimate command - quadric edge-collapse downsampling.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_register::{Surface, downsample_mesh};

use crate::Cli;

pub fn run(input: &Path, output: &Path, ratio: f64, cli: &Cli) -> Result<()> {
    let surface =
        Surface::load(input).with_context(|| format!("loading {}", input.display()))?;
    let result = downsample_mesh(&surface, ratio)?;
    result
        .surface
        .save(output)
        .with_context(|| format!("saving {}", output.display()))?;

    if !cli.quiet {
        println!(
            "{} {} -> {} vertices",
            "decimated:".green().bold(),
            surface.vertex_count(),
            result.surface.vertex_count()
        );
    }

    Ok(())
}
