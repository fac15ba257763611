//! Viscoelastic non-rigid transformation.
//!
//! Deformation is driven by a per-vertex force field (vector to the current
//! correspondence) and carried by a cumulative displacement field defined on
//! the level's reference frame: the floating positions at the start of the
//! resolution level. Gaussian smoothing of the force field gives the
//! deformation its viscous character; smoothing the accumulated displacement
//! keeps the overall surface coherent (the elastic part). Positions are
//! always `reference + displacement`, and normals are recomputed from the
//! faces after every update.
//!
//! Smoothing neighbourhoods are 3D k-NN over the reference positions, so
//! they are computed once per level and cached on the field together with
//! their Gaussian weights.

use crate::correspondence::Correspondences;
use crate::spatial::PositionIndex;
use crate::{RegisterError, RegisterResult, Surface};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Combined smoothing weights below this fall back to the plain Gaussian
/// average.
const MIN_WEIGHT_SUM: f64 = 1e-12;

/// Parameters for one viscoelastic update.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ViscoElasticParams {
    /// Neighbours per vertex in the smoothing kernel. Default: 10
    pub num_smoothing_neighbours: usize,

    /// Gaussian sigma of the smoothing kernel, in world units. Default: 3.0
    pub sigma: f64,

    /// Smoothing passes over the force field.
    pub num_viscous_iterations: usize,

    /// Smoothing passes over the accumulated displacement field.
    pub num_elastic_iterations: usize,
}

impl Default for ViscoElasticParams {
    fn default() -> Self {
        Self {
            num_smoothing_neighbours: 10,
            sigma: 3.0,
            num_viscous_iterations: 50,
            num_elastic_iterations: 50,
        }
    }
}

/// The cumulative displacement field of one resolution level.
///
/// Owns the reference positions (floating positions at level start), the
/// displacement vectors (zeroed at construction), and the cached smoothing
/// neighbourhoods with precomputed Gaussian weights.
pub struct DisplacementField {
    reference: Vec<Point3<f64>>,
    vectors: Vec<Vector3<f64>>,
    neighbours: Vec<Vec<(usize, f64)>>,
}

impl DisplacementField {
    /// Create a zeroed displacement field on the given surface's current
    /// positions.
    pub fn new(surface: &Surface, num_neighbours: usize, sigma: f64) -> Self {
        let num_neighbours = num_neighbours.max(1);
        let reference: Vec<Point3<f64>> =
            surface.features.iter().map(|f| f.position).collect();

        let index = PositionIndex::build(
            reference.iter().map(|p| [p.x, p.y, p.z]),
        );
        let inv_two_sigma_sq = 0.5 / (sigma * sigma);
        let neighbours: Vec<Vec<(usize, f64)>> = reference
            .par_iter()
            .map(|position| {
                index
                    .knn(&[position.x, position.y, position.z], num_neighbours)
                    .into_iter()
                    .map(|(j, dist_sq)| (j, (-dist_sq * inv_two_sigma_sq).exp()))
                    .collect()
            })
            .collect();

        Self {
            vectors: vec![Vector3::zeros(); reference.len()],
            reference,
            neighbours,
        }
    }

    /// Number of field vectors.
    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Check if the field is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The cumulative displacement vectors.
    pub fn vectors(&self) -> &[Vector3<f64>] {
        &self.vectors
    }

    /// The reference positions the field is defined on.
    pub fn reference_positions(&self) -> &[Point3<f64>] {
        &self.reference
    }

    /// One Gaussian smoothing pass over a vector field, weighted by the
    /// cached kernel and the per-vertex weights. A vertex whose combined
    /// weights vanish falls back to the unweighted Gaussian average.
    fn smooth(&self, vectors: &[Vector3<f64>], weights: &[f64]) -> Vec<Vector3<f64>> {
        (0..vectors.len())
            .into_par_iter()
            .map(|i| {
                let mut weighted = Vector3::zeros();
                let mut weighted_sum = 0.0;
                let mut plain = Vector3::zeros();
                let mut plain_sum = 0.0;

                for &(j, gaussian) in &self.neighbours[i] {
                    let combined = gaussian * weights[j];
                    weighted += combined * vectors[j];
                    weighted_sum += combined;
                    plain += gaussian * vectors[j];
                    plain_sum += gaussian;
                }

                if weighted_sum > MIN_WEIGHT_SUM {
                    weighted / weighted_sum
                } else {
                    plain / plain_sum
                }
            })
            .collect()
    }
}

/// Apply one viscoelastic update to the floating surface.
///
/// The force field (correspondence minus current position, weighted by
/// inlier weight times floating flag) is smoothed `num_viscous_iterations`
/// times, added to the displacement field, which is then smoothed
/// `num_elastic_iterations` times. Positions become reference plus
/// displacement; normals are recomputed from the faces.
pub fn compute_nonrigid_transformation(
    floating: &mut Surface,
    correspondences: &Correspondences,
    inlier_weights: &[f64],
    field: &mut DisplacementField,
    params: &ViscoElasticParams,
) -> RegisterResult<()> {
    let num_vertices = floating.vertex_count();
    if correspondences.features.len() != num_vertices
        || inlier_weights.len() != num_vertices
        || field.len() != num_vertices
    {
        return Err(RegisterError::MalformedInput {
            details: format!(
                "{} correspondences, {} weights, {} field vectors for {} vertices",
                correspondences.features.len(),
                inlier_weights.len(),
                field.len(),
                num_vertices
            ),
        });
    }

    let weights: Vec<f64> = inlier_weights
        .iter()
        .zip(&floating.flags)
        .map(|(&weight, &flag)| weight * flag)
        .collect();

    // Viscous part: smooth the force field towards the correspondences.
    let mut force: Vec<Vector3<f64>> = (0..num_vertices)
        .map(|i| {
            correspondences.features[i].position
                - (field.reference[i] + field.vectors[i])
        })
        .collect();
    for _ in 0..params.num_viscous_iterations {
        force = field.smooth(&force, &weights);
    }

    // Elastic part: accumulate, then smooth the whole displacement field.
    let mut displacement: Vec<Vector3<f64>> = field
        .vectors
        .iter()
        .zip(&force)
        .map(|(d, f)| d + f)
        .collect();
    for _ in 0..params.num_elastic_iterations {
        displacement = field.smooth(&displacement, &weights);
    }
    field.vectors = displacement;

    for (i, feature) in floating.features.iter_mut().enumerate() {
        feature.position = field.reference[i] + field.vectors[i];
    }
    floating.compute_normals();

    Ok(())
}
