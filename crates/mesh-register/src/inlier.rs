//! Robust inlier weighting of correspondences.
//!
//! Each floating vertex gets a confidence in [0, 1] that its correspondence
//! is reliable, from the positional residual, the correspondence flag, and
//! the robustness parameter kappa. Residuals are compared against a scale
//! estimate sigma taken from the previous iteration's weights, so the weight
//! buffer is carried across iterations by the caller (seeded with ones on
//! the first pass).

use crate::correspondence::Correspondences;
use crate::{RegisterError, RegisterResult, Surface};

/// Sigma below this is treated as an exact fit.
const MIN_SIGMA: f64 = 1e-12;

/// Compute robust inlier weights for the current correspondences.
///
/// `weights` holds the previous iteration's weights on entry (used for the
/// weighted mean-residual sigma estimate) and is overwritten with the new
/// weights. Each weight is `1 / (1 + (r / (kappa * sigma))^2)` multiplied by
/// the correspondence flag; with sigma near zero all unflagged vertices are
/// perfect inliers.
pub fn compute_inlier_weights(
    floating: &Surface,
    correspondences: &Correspondences,
    kappa: f64,
    weights: &mut Vec<f64>,
) -> RegisterResult<()> {
    let num_vertices = floating.vertex_count();
    if correspondences.features.len() != num_vertices {
        return Err(RegisterError::MalformedInput {
            details: format!(
                "{} correspondences for {} vertices",
                correspondences.features.len(),
                num_vertices
            ),
        });
    }
    if weights.len() != num_vertices {
        weights.clear();
        weights.resize(num_vertices, 1.0);
    }

    let residuals: Vec<f64> = floating
        .features
        .iter()
        .zip(&correspondences.features)
        .map(|(feature, corresponding)| (feature.position - corresponding.position).norm())
        .collect();

    // Scale estimate: weighted mean residual under the previous weights.
    let mut residual_sum = 0.0;
    let mut weight_sum = 0.0;
    for (&residual, &weight) in residuals.iter().zip(weights.iter()) {
        residual_sum += weight * residual;
        weight_sum += weight;
    }
    if weight_sum <= 0.0 {
        return Err(RegisterError::NumericalFailure {
            details: "all prior inlier weights are zero".to_string(),
        });
    }
    let sigma = residual_sum / weight_sum;

    for ((weight, &residual), &flag) in weights
        .iter_mut()
        .zip(&residuals)
        .zip(&correspondences.flags)
    {
        *weight = if sigma < MIN_SIGMA {
            flag
        } else {
            let scaled = residual / (kappa * sigma);
            flag / (1.0 + scaled * scaled)
        };
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Feature;
    use nalgebra::{Point3, Vector3};

    fn flat_strip(positions: &[[f64; 3]]) -> Surface {
        let features = positions
            .iter()
            .map(|&[x, y, z]| Feature::new(Point3::new(x, y, z), Vector3::z()))
            .collect::<Vec<_>>();
        let flags = vec![1.0; features.len()];
        Surface {
            features,
            faces: vec![[0, 1, 2]],
            flags,
        }
    }

    fn correspondences_at(positions: &[[f64; 3]], flags: &[f64]) -> Correspondences {
        Correspondences {
            features: positions
                .iter()
                .map(|&[x, y, z]| Feature::new(Point3::new(x, y, z), Vector3::z()))
                .collect(),
            flags: flags.to_vec(),
        }
    }

    #[test]
    fn test_exact_fit_gives_unit_weights() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let surface = flat_strip(&positions);
        let correspondences = correspondences_at(&positions, &[1.0, 1.0, 1.0]);

        let mut weights = vec![1.0; 3];
        compute_inlier_weights(&surface, &correspondences, 4.0, &mut weights).unwrap();

        for &w in &weights {
            assert_eq!(w, 1.0);
        }
    }

    #[test]
    fn test_outlier_is_downweighted() {
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
        ];
        let mut surface = flat_strip(&positions[..3]);
        surface.features.push(Feature::new(
            Point3::new(3.0, 0.0, 0.0),
            Vector3::z(),
        ));
        surface.flags.push(1.0);

        // small uniform residual except one gross outlier
        let corresponding = [
            [0.0, 0.1, 0.0],
            [1.0, 0.1, 0.0],
            [2.0, 0.1, 0.0],
            [3.0, 5.0, 0.0],
        ];
        let correspondences = correspondences_at(&corresponding, &[1.0; 4]);

        let mut weights = vec![1.0; 4];
        compute_inlier_weights(&surface, &correspondences, 2.0, &mut weights).unwrap();

        assert!(weights[3] < weights[0]);
        assert!(weights[3] < 0.5, "outlier weight {}", weights[3]);
        for &w in &weights {
            assert!((0.0..=1.0).contains(&w));
        }
    }

    #[test]
    fn test_flag_zero_gives_weight_zero() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let surface = flat_strip(&positions);
        let corresponding = [[0.0, 0.1, 0.0], [1.0, 0.1, 0.0], [0.5, 1.1, 0.0]];
        let correspondences = correspondences_at(&corresponding, &[1.0, 0.0, 1.0]);

        let mut weights = vec![1.0; 3];
        compute_inlier_weights(&surface, &correspondences, 4.0, &mut weights).unwrap();

        assert_eq!(weights[1], 0.0);
        assert!(weights[0] > 0.0);
    }

    #[test]
    fn test_all_zero_prior_weights_is_an_error() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let surface = flat_strip(&positions);
        let correspondences = correspondences_at(&positions, &[1.0, 1.0, 1.0]);

        let mut weights = vec![0.0; 3];
        let result = compute_inlier_weights(&surface, &correspondences, 4.0, &mut weights);
        assert!(matches!(
            result,
            Err(RegisterError::NumericalFailure { .. })
        ));
    }

    #[test]
    fn test_weight_buffer_resized_when_stale() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let surface = flat_strip(&positions);
        let correspondences = correspondences_at(&positions, &[1.0, 1.0, 1.0]);

        let mut weights = Vec::new();
        compute_inlier_weights(&surface, &correspondences, 4.0, &mut weights).unwrap();
        assert_eq!(weights.len(), 3);
    }
}
