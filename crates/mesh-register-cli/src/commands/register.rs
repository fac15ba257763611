//! mesh-register register command - pyramid non-rigid registration.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_register::{NonrigidParams, PyramidParams, Surface};

use crate::Cli;

#[allow(clippy::too_many_arguments)]
pub fn run(
    floating_path: &Path,
    target_path: &Path,
    output: &Path,
    iterations: usize,
    layers: usize,
    downsample_start: f64,
    sigma: f64,
    asymmetric: bool,
    no_pyramid: bool,
    cli: &Cli,
) -> Result<()> {
    let mut floating = Surface::load(floating_path)
        .with_context(|| format!("loading floating mesh {}", floating_path.display()))?;
    let target = Surface::load(target_path)
        .with_context(|| format!("loading target mesh {}", target_path.display()))?;

    let final_residual = if no_pyramid {
        let mut params = NonrigidParams::default()
            .with_num_iterations(iterations)
            .with_sigma(sigma);
        params.correspondences_symmetric = !asymmetric;
        let result = floating.register_nonrigid(&target, &params)?;
        result.residual_history.last().copied()
    } else {
        let mut params = PyramidParams::default()
            .with_num_iterations(iterations)
            .with_num_layers(layers)
            .with_downsample_start(downsample_start)
            .with_sigma(sigma);
        params.correspondences_symmetric = !asymmetric;
        let result = floating.register_pyramid(&target, &params)?;
        result.residual_history.last().copied()
    };

    floating
        .save(output)
        .with_context(|| format!("saving {}", output.display()))?;

    if !cli.quiet {
        println!(
            "{} {} onto {} -> {}",
            "registered".green().bold(),
            floating_path.display(),
            target_path.display(),
            output.display()
        );
        if let Some(residual) = final_residual {
            println!("final mean residual: {:.6}", residual);
        }
    }

    Ok(())
}
