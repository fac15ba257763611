//! mesh-register rigid command - iterative rigid alignment.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_register::{RigidParams, Surface};

use crate::Cli;

pub fn run(
    floating_path: &Path,
    target_path: &Path,
    output: &Path,
    iterations: usize,
    scaling: bool,
    cli: &Cli,
) -> Result<()> {
    let mut floating = Surface::load(floating_path)
        .with_context(|| format!("loading floating mesh {}", floating_path.display()))?;
    let target = Surface::load(target_path)
        .with_context(|| format!("loading target mesh {}", target_path.display()))?;

    let mut params = RigidParams::default().with_num_iterations(iterations);
    if scaling {
        params = params.with_scaling();
    }
    let result = floating.register_rigid(&target, &params)?;

    floating
        .save(output)
        .with_context(|| format!("saving {}", output.display()))?;

    if !cli.quiet {
        let translation = result.transform.translation();
        println!(
            "{} rotation {:.4} rad, translation ({:.4}, {:.4}, {:.4}), scale {:.4}",
            "aligned:".green().bold(),
            result.transform.rotation().angle(),
            translation.x,
            translation.y,
            translation.z,
            result.transform.scale()
        );
    }

    Ok(())
}
