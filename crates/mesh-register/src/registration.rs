//! Registration entry points: rigid, non-rigid, and the coarse-to-fine
//! pyramid scheduler.
//!
//! All three mutate the floating surface in place and borrow the target
//! read-only. One non-rigid iteration is the strict data chain
//! correspondences -> inlier weights -> viscoelastic update; the rigid loop
//! swaps the last stage for the closed-form similarity transform. The
//! pyramid builds downsampled levels of both meshes, preconditions the
//! coarsest with the rigid loop, and scale-shifts the deformation from level
//! to level.

use crate::correspondence::{CorrespondenceParams, Correspondences, compute_correspondences};
use crate::downsample::downsample_mesh;
use crate::inlier::compute_inlier_weights;
use crate::rigid::{RigidTransform, compute_rigid_transformation};
use crate::scaleshift::scale_shift_mesh;
use crate::viscoelastic::{
    DisplacementField, ViscoElasticParams, compute_nonrigid_transformation,
};
use crate::{RegisterResult, Surface};
use tracing::{debug, info, trace};

/// Parameters for iterative rigid registration.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct RigidParams {
    /// Number of correspondence/transform iterations. Default: 20
    pub num_iterations: usize,

    /// Use symmetric (push-pull) correspondences. Default: true
    pub correspondences_symmetric: bool,

    /// Neighbours per affinity row. Default: 5
    pub correspondences_num_neighbours: usize,

    /// Robust kernel width for inlier weighting. Default: 4.0
    pub inlier_kappa: f64,

    /// Estimate a uniform scale in addition to rotation and translation.
    /// Default: false
    pub allow_scaling: bool,
}

impl Default for RigidParams {
    fn default() -> Self {
        Self {
            num_iterations: 20,
            correspondences_symmetric: true,
            correspondences_num_neighbours: 5,
            inlier_kappa: 4.0,
            allow_scaling: false,
        }
    }
}

impl RigidParams {
    /// Set the iteration count.
    pub fn with_num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Allow uniform scaling.
    pub fn with_scaling(mut self) -> Self {
        self.allow_scaling = true;
        self
    }

    /// Use one-way instead of push-pull correspondences.
    pub fn with_asymmetric_correspondences(mut self) -> Self {
        self.correspondences_symmetric = false;
        self
    }
}

/// Parameters for one non-rigid registration loop (a single resolution).
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NonrigidParams {
    /// Number of non-rigid iterations. Default: 60
    pub num_iterations: usize,

    /// Use symmetric (push-pull) correspondences. Default: true
    pub correspondences_symmetric: bool,

    /// Neighbours per affinity row. Default: 5
    pub correspondences_num_neighbours: usize,

    /// Robust kernel width for inlier weighting. Default: 4.0
    pub inlier_kappa: f64,

    /// Gaussian sigma of the deformation smoothing, in world units.
    /// Default: 3.0
    pub transform_sigma: f64,

    /// Neighbours in the smoothing kernel. Default: 10
    pub transform_num_smoothing_neighbours: usize,

    /// Viscous smoothing passes on the first iteration. Default: 50
    pub transform_num_viscous_iterations_start: usize,

    /// Viscous smoothing passes on the last iteration. Default: 1
    pub transform_num_viscous_iterations_end: usize,

    /// Elastic smoothing passes on the first iteration. Default: 50
    pub transform_num_elastic_iterations_start: usize,

    /// Elastic smoothing passes on the last iteration. Default: 1
    pub transform_num_elastic_iterations_end: usize,
}

impl Default for NonrigidParams {
    fn default() -> Self {
        Self {
            num_iterations: 60,
            correspondences_symmetric: true,
            correspondences_num_neighbours: 5,
            inlier_kappa: 4.0,
            transform_sigma: 3.0,
            transform_num_smoothing_neighbours: 10,
            transform_num_viscous_iterations_start: 50,
            transform_num_viscous_iterations_end: 1,
            transform_num_elastic_iterations_start: 50,
            transform_num_elastic_iterations_end: 1,
        }
    }
}

impl NonrigidParams {
    /// Set the iteration count.
    pub fn with_num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Set the smoothing sigma.
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.transform_sigma = sigma;
        self
    }

    /// Set the viscous annealing schedule.
    pub fn with_viscous_iterations(mut self, start: usize, end: usize) -> Self {
        self.transform_num_viscous_iterations_start = start;
        self.transform_num_viscous_iterations_end = end;
        self
    }

    /// Set the elastic annealing schedule.
    pub fn with_elastic_iterations(mut self, start: usize, end: usize) -> Self {
        self.transform_num_elastic_iterations_start = start;
        self.transform_num_elastic_iterations_end = end;
        self
    }

    fn correspondence_params(&self) -> CorrespondenceParams {
        CorrespondenceParams {
            symmetric: self.correspondences_symmetric,
            num_neighbours: self.correspondences_num_neighbours,
        }
    }
}

/// Parameters for the full coarse-to-fine pyramid registration.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PyramidParams {
    /// Total non-rigid iterations, divided across the levels. Default: 60
    pub num_iterations: usize,

    /// Number of resolution levels. Default: 3
    pub num_pyramid_layers: usize,

    /// Percent decimation of the floating mesh at the coarsest level.
    /// Default: 90
    pub downsample_float_start: f64,

    /// Percent decimation of the target mesh at the coarsest level.
    /// Default: 90
    pub downsample_target_start: f64,

    /// Percent decimation of the floating mesh at the finest level.
    /// Default: 0
    pub downsample_float_end: f64,

    /// Percent decimation of the target mesh at the finest level. Default: 0
    pub downsample_target_end: f64,

    /// Rigid preconditioning iterations on the coarsest level. Default: 20
    pub rigid_iterations: usize,

    /// Use symmetric (push-pull) correspondences. Default: true
    pub correspondences_symmetric: bool,

    /// Neighbours per affinity row. Default: 5
    pub correspondences_num_neighbours: usize,

    /// Robust kernel width for inlier weighting. Default: 4.0
    pub inlier_kappa: f64,

    /// Gaussian sigma of the deformation smoothing, in world units.
    /// Default: 3.0
    pub transform_sigma: f64,

    /// Neighbours in the smoothing kernel. Default: 10
    pub transform_num_smoothing_neighbours: usize,

    /// Viscous smoothing passes at the start of the run. Default: 50
    pub transform_num_viscous_iterations_start: usize,

    /// Viscous smoothing passes at the end of the run. Default: 1
    pub transform_num_viscous_iterations_end: usize,

    /// Elastic smoothing passes at the start of the run. Default: 50
    pub transform_num_elastic_iterations_start: usize,

    /// Elastic smoothing passes at the end of the run. Default: 1
    pub transform_num_elastic_iterations_end: usize,
}

impl Default for PyramidParams {
    fn default() -> Self {
        Self {
            num_iterations: 60,
            num_pyramid_layers: 3,
            downsample_float_start: 90.0,
            downsample_target_start: 90.0,
            downsample_float_end: 0.0,
            downsample_target_end: 0.0,
            rigid_iterations: 20,
            correspondences_symmetric: true,
            correspondences_num_neighbours: 5,
            inlier_kappa: 4.0,
            transform_sigma: 3.0,
            transform_num_smoothing_neighbours: 10,
            transform_num_viscous_iterations_start: 50,
            transform_num_viscous_iterations_end: 1,
            transform_num_elastic_iterations_start: 50,
            transform_num_elastic_iterations_end: 1,
        }
    }
}

impl PyramidParams {
    /// Set the total non-rigid iteration count.
    pub fn with_num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Set the number of pyramid levels.
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_pyramid_layers = num_layers.max(1);
        self
    }

    /// Set the decimation percentages for both meshes at the coarsest level.
    pub fn with_downsample_start(mut self, percent: f64) -> Self {
        self.downsample_float_start = percent;
        self.downsample_target_start = percent;
        self
    }

    /// Set the smoothing sigma.
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.transform_sigma = sigma;
        self
    }
}

/// Result of an iterative rigid registration.
#[derive(Debug, Clone)]
pub struct RigidResult {
    /// Accumulated transformation over all iterations.
    pub transform: RigidTransform,

    /// Number of iterations performed.
    pub iterations: usize,

    /// Inlier-weighted mean residual after each iteration.
    pub residual_history: Vec<f64>,
}

/// Result of a non-rigid registration loop.
#[derive(Debug, Clone)]
pub struct NonrigidResult {
    /// Number of iterations performed.
    pub iterations: usize,

    /// Inlier-weighted mean residual after each iteration.
    pub residual_history: Vec<f64>,
}

/// Summary of one pyramid level.
#[derive(Debug, Clone)]
pub struct LevelSummary {
    /// Level number, 0 = coarsest.
    pub level: usize,

    /// Floating vertex count at this level.
    pub floating_vertices: usize,

    /// Target vertex count at this level.
    pub target_vertices: usize,

    /// Non-rigid iterations run at this level.
    pub iterations: usize,
}

/// Result of a pyramid registration.
#[derive(Debug, Clone)]
pub struct PyramidResult {
    /// Per-level summaries, coarsest first.
    pub levels: Vec<LevelSummary>,

    /// Residual histories of all levels, concatenated.
    pub residual_history: Vec<f64>,
}

/// Linear annealing between two pass counts over a loop's iterations.
/// Single-iteration loops use the end value.
pub(crate) fn annealed_count(start: usize, end: usize, iteration: usize, total: usize) -> usize {
    if total <= 1 {
        return end;
    }
    let t = iteration as f64 / (total - 1) as f64;
    (start as f64 + (end as f64 - start as f64) * t).round() as usize
}

/// Inlier-weighted mean positional residual to the correspondences.
fn weighted_mean_residual(
    floating: &Surface,
    correspondences: &Correspondences,
    weights: &[f64],
) -> f64 {
    let mut residual_sum = 0.0;
    let mut weight_sum = 0.0;
    for (i, feature) in floating.features.iter().enumerate() {
        let residual = (feature.position - correspondences.features[i].position).norm();
        residual_sum += weights[i] * residual;
        weight_sum += weights[i];
    }
    if weight_sum > 0.0 {
        residual_sum / weight_sum
    } else {
        0.0
    }
}

/// Iteratively rigid-register the floating surface onto the target.
///
/// Each iteration recomputes correspondences and inlier weights, then applies
/// the closed-form weighted similarity transform. Returns the accumulated
/// transformation and the residual history.
pub fn rigid_registration(
    floating: &mut Surface,
    target: &Surface,
    params: &RigidParams,
) -> RegisterResult<RigidResult> {
    floating.validate()?;
    target.validate()?;

    info!(
        "rigid registration: {} -> {} vertices, {} iterations",
        floating.vertex_count(),
        target.vertex_count(),
        params.num_iterations
    );

    let correspondence_params = CorrespondenceParams {
        symmetric: params.correspondences_symmetric,
        num_neighbours: params.correspondences_num_neighbours,
    };

    let mut weights = vec![1.0; floating.vertex_count()];
    let mut transform = RigidTransform::identity();
    let mut residual_history = Vec::with_capacity(params.num_iterations);

    for iteration in 0..params.num_iterations {
        let correspondences =
            compute_correspondences(floating, target, &correspondence_params)?;
        compute_inlier_weights(floating, &correspondences, params.inlier_kappa, &mut weights)?;
        let step = compute_rigid_transformation(
            floating,
            &correspondences,
            &weights,
            params.allow_scaling,
        )?;
        transform = transform.then(&step);

        let residual = weighted_mean_residual(floating, &correspondences, &weights);
        trace!("rigid iteration {}: residual {:.6e}", iteration, residual);
        residual_history.push(residual);
    }

    Ok(RigidResult {
        transform,
        iterations: params.num_iterations,
        residual_history,
    })
}

/// Run one non-rigid registration loop at the surfaces' native resolution.
///
/// The displacement field lives on the floating positions at entry; viscous
/// and elastic pass counts are annealed linearly over the iterations.
pub fn nonrigid_registration(
    floating: &mut Surface,
    target: &Surface,
    params: &NonrigidParams,
) -> RegisterResult<NonrigidResult> {
    floating.validate()?;
    target.validate()?;

    info!(
        "nonrigid registration: {} -> {} vertices, {} iterations",
        floating.vertex_count(),
        target.vertex_count(),
        params.num_iterations
    );

    let correspondence_params = params.correspondence_params();
    let mut weights = vec![1.0; floating.vertex_count()];
    let mut field = DisplacementField::new(
        floating,
        params.transform_num_smoothing_neighbours,
        params.transform_sigma,
    );
    let mut residual_history = Vec::with_capacity(params.num_iterations);

    for iteration in 0..params.num_iterations {
        let correspondences =
            compute_correspondences(floating, target, &correspondence_params)?;
        compute_inlier_weights(floating, &correspondences, params.inlier_kappa, &mut weights)?;

        let viscoelastic = ViscoElasticParams {
            num_smoothing_neighbours: params.transform_num_smoothing_neighbours,
            sigma: params.transform_sigma,
            num_viscous_iterations: annealed_count(
                params.transform_num_viscous_iterations_start,
                params.transform_num_viscous_iterations_end,
                iteration,
                params.num_iterations,
            ),
            num_elastic_iterations: annealed_count(
                params.transform_num_elastic_iterations_start,
                params.transform_num_elastic_iterations_end,
                iteration,
                params.num_iterations,
            ),
        };
        compute_nonrigid_transformation(
            floating,
            &correspondences,
            &weights,
            &mut field,
            &viscoelastic,
        )?;

        let residual = weighted_mean_residual(floating, &correspondences, &weights);
        trace!(
            "nonrigid iteration {}: residual {:.6e} (viscous {}, elastic {})",
            iteration, residual, viscoelastic.num_viscous_iterations,
            viscoelastic.num_elastic_iterations
        );
        residual_history.push(residual);
    }

    Ok(NonrigidResult {
        iterations: params.num_iterations,
        residual_history,
    })
}

/// Register the floating surface onto the target through a coarse-to-fine
/// pyramid, mutating the floating features in place.
pub fn pyramid_registration(
    floating: &mut Surface,
    target: &Surface,
    params: &PyramidParams,
) -> RegisterResult<PyramidResult> {
    floating.validate()?;
    target.validate()?;

    let num_layers = params.num_pyramid_layers.max(1);
    let iterations_per_level =
        ((params.num_iterations as f64 / num_layers as f64).round() as usize).max(1);
    let total_iterations = iterations_per_level * num_layers;

    info!(
        "pyramid registration: {} levels, {} iterations per level",
        num_layers, iterations_per_level
    );

    let mut levels = Vec::with_capacity(num_layers);
    let mut residual_history = Vec::new();
    let mut current: Option<(Surface, Vec<usize>)> = None;

    for level in 0..num_layers {
        let progress = if num_layers > 1 {
            level as f64 / (num_layers - 1) as f64
        } else {
            1.0
        };
        let float_ratio = (params.downsample_float_start
            + (params.downsample_float_end - params.downsample_float_start) * progress)
            / 100.0;
        let target_ratio = (params.downsample_target_start
            + (params.downsample_target_end - params.downsample_target_start) * progress)
            / 100.0;

        // Each level decimates the original meshes, not the previous level.
        let mut float_level = downsample_mesh(floating, float_ratio)?;
        let target_level = downsample_mesh(target, target_ratio)?.surface;

        debug!(
            "level {}: floating {} vertices (ratio {:.2}), target {} vertices (ratio {:.2})",
            level,
            float_level.surface.vertex_count(),
            float_ratio,
            target_level.vertex_count(),
            target_ratio
        );

        match current.take() {
            None => {
                // Coarsest level: rigid preconditioning.
                if params.rigid_iterations > 0 {
                    let rigid_params = RigidParams {
                        num_iterations: params.rigid_iterations,
                        correspondences_symmetric: params.correspondences_symmetric,
                        correspondences_num_neighbours: params.correspondences_num_neighbours,
                        inlier_kappa: params.inlier_kappa,
                        allow_scaling: false,
                    };
                    rigid_registration(&mut float_level.surface, &target_level, &rigid_params)?;
                }
            }
            Some((previous, previous_indices)) => {
                scale_shift_mesh(
                    &previous,
                    &previous_indices,
                    &mut float_level.surface,
                    &float_level.original_indices,
                )?;
            }
        }

        // This level's slice of the global annealing schedule.
        let first = level * iterations_per_level;
        let last = (level + 1) * iterations_per_level - 1;
        let level_params = NonrigidParams {
            num_iterations: iterations_per_level,
            correspondences_symmetric: params.correspondences_symmetric,
            correspondences_num_neighbours: params.correspondences_num_neighbours,
            inlier_kappa: params.inlier_kappa,
            transform_sigma: params.transform_sigma,
            transform_num_smoothing_neighbours: params.transform_num_smoothing_neighbours,
            transform_num_viscous_iterations_start: annealed_count(
                params.transform_num_viscous_iterations_start,
                params.transform_num_viscous_iterations_end,
                first,
                total_iterations,
            ),
            transform_num_viscous_iterations_end: annealed_count(
                params.transform_num_viscous_iterations_start,
                params.transform_num_viscous_iterations_end,
                last,
                total_iterations,
            ),
            transform_num_elastic_iterations_start: annealed_count(
                params.transform_num_elastic_iterations_start,
                params.transform_num_elastic_iterations_end,
                first,
                total_iterations,
            ),
            transform_num_elastic_iterations_end: annealed_count(
                params.transform_num_elastic_iterations_start,
                params.transform_num_elastic_iterations_end,
                last,
                total_iterations,
            ),
        };

        let result = nonrigid_registration(&mut float_level.surface, &target_level, &level_params)?;

        levels.push(LevelSummary {
            level,
            floating_vertices: float_level.surface.vertex_count(),
            target_vertices: target_level.vertex_count(),
            iterations: result.iterations,
        });
        residual_history.extend(result.residual_history);

        current = Some((float_level.surface, float_level.original_indices));
    }

    // Write the final features back into the caller's buffer; lift to the
    // full vertex set first when the finest level was still decimated.
    let (final_surface, final_indices) = current.expect("at least one pyramid level");
    if final_surface.vertex_count() == floating.vertex_count() {
        floating.features = final_surface.features;
    } else {
        let identity: Vec<usize> = (0..floating.vertex_count()).collect();
        let mut full = floating.clone();
        scale_shift_mesh(&final_surface, &final_indices, &mut full, &identity)?;
        floating.features = full.features;
        floating.compute_normals();
    }

    info!("pyramid registration complete");

    Ok(PyramidResult {
        levels,
        residual_history,
    })
}
