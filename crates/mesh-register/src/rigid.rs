//! Weighted rigid (similarity) alignment of floating features onto their
//! correspondences.
//!
//! The closed-form quaternion solution: the rotation maximizing the weighted
//! correlation between the centred point sets is the dominant eigenvector of
//! a 4x4 symmetric matrix assembled from the cross-variance. Uniform scale is
//! optional; translation falls out of the centroids.

use crate::correspondence::Correspondences;
use crate::{RegisterError, RegisterResult, Surface};
use nalgebra::{
    Matrix3, Matrix4, Point3, Quaternion, Rotation3, Similarity3, Translation3, UnitQuaternion,
    Vector3,
};

/// The similarity transformation produced by the solver: uniform scale, then
/// rotation, then translation.
///
/// A thin wrapper over [`nalgebra::Similarity3`]; application, composition,
/// inversion, and the homogeneous matrix all delegate to it. The wrapper adds
/// the one operation a similarity does not have: rotating a surface normal
/// without picking up the scale.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform(Similarity3<f64>);

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Create an identity transformation.
    pub fn identity() -> Self {
        Self(Similarity3::identity())
    }

    /// Assemble a transformation from its components. `scale` must be
    /// positive.
    pub fn from_parts(
        rotation: UnitQuaternion<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Self {
        Self(Similarity3::from_parts(
            Translation3::from(translation),
            rotation,
            scale,
        ))
    }

    /// The rotation component.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.0.isometry.rotation
    }

    /// The translation component.
    pub fn translation(&self) -> Vector3<f64> {
        self.0.isometry.translation.vector
    }

    /// The uniform scale factor (1.0 = no scaling).
    pub fn scale(&self) -> f64 {
        self.0.scaling()
    }

    /// Apply the transformation to a point: `s * R * p + t`.
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.0.transform_point(point)
    }

    /// Rotate a direction vector, ignoring scale and translation. This is
    /// the normal-vector path.
    pub fn rotate_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.0.isometry.rotation.transform_vector(vector)
    }

    /// Compose with another transformation (self applied first, then other).
    pub fn then(&self, other: &RigidTransform) -> RigidTransform {
        Self(other.0 * self.0)
    }

    /// Get the inverse transformation.
    pub fn inverse(&self) -> RigidTransform {
        Self(self.0.inverse())
    }

    /// Convert to a 4x4 homogeneous transformation matrix.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        self.0.to_homogeneous()
    }
}

/// Compute the weighted rigid transformation from the floating positions to
/// their corresponding positions and apply it in place.
///
/// Positions become `s * R * p + t`; normals get the rotation only and are
/// renormalized. Returns the transformation that was applied.
///
/// Fails with [`RegisterError::NumericalFailure`] when the weight sum is
/// degenerate or the eigen solver does not converge.
pub fn compute_rigid_transformation(
    floating: &mut Surface,
    correspondences: &Correspondences,
    weights: &[f64],
    allow_scaling: bool,
) -> RegisterResult<RigidTransform> {
    let num_vertices = floating.vertex_count();
    if correspondences.features.len() != num_vertices || weights.len() != num_vertices {
        return Err(RegisterError::MalformedInput {
            details: format!(
                "{} correspondences and {} weights for {} vertices",
                correspondences.features.len(),
                weights.len(),
                num_vertices
            ),
        });
    }

    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return Err(RegisterError::NumericalFailure {
            details: "degenerate weight sum in rigid transformation".to_string(),
        });
    }

    // Weighted centroids of both point sets.
    let mut floating_centroid = Vector3::zeros();
    let mut corresponding_centroid = Vector3::zeros();
    for i in 0..num_vertices {
        floating_centroid += weights[i] * floating.features[i].position.coords;
        corresponding_centroid += weights[i] * correspondences.features[i].position.coords;
    }
    floating_centroid /= weight_sum;
    corresponding_centroid /= weight_sum;

    // Cross-variance of the weighted point sets.
    let mut cross_variance = Matrix3::zeros();
    for i in 0..num_vertices {
        cross_variance += weights[i]
            * (floating.features[i].position.coords
                * correspondences.features[i].position.coords.transpose());
    }
    cross_variance =
        cross_variance / weight_sum - floating_centroid * corresponding_centroid.transpose();

    // Antisymmetric part yields the quaternion's vector component.
    let antisymmetric = cross_variance - cross_variance.transpose();
    let delta = Vector3::new(
        antisymmetric[(1, 2)],
        antisymmetric[(2, 0)],
        antisymmetric[(0, 1)],
    );

    let trace = cross_variance.trace();
    let mut q = Matrix4::zeros();
    q[(0, 0)] = trace;
    q.fixed_view_mut::<3, 1>(1, 0).copy_from(&delta);
    q.fixed_view_mut::<1, 3>(0, 1).copy_from(&delta.transpose());
    q.fixed_view_mut::<3, 3>(1, 1).copy_from(
        &(cross_variance + cross_variance.transpose() - trace * Matrix3::identity()),
    );

    // Rotation quaternion: eigenvector of Q with the largest eigenvalue.
    let eigen = q
        .try_symmetric_eigen(1.0e-12, 256)
        .ok_or_else(|| RegisterError::NumericalFailure {
            details: "eigen decomposition of the rotation matrix Q did not converge".to_string(),
        })?;

    let mut max_index = 0;
    for i in 1..4 {
        if eigen.eigenvalues[i] > eigen.eigenvalues[max_index] {
            max_index = i;
        }
    }
    let mut quat = eigen.eigenvectors.column(max_index).clone_owned();
    if quat[0] < 0.0 {
        // eigenvector sign is arbitrary; fix the scalar part for determinism
        quat = -quat;
    }
    let rotation =
        UnitQuaternion::from_quaternion(Quaternion::new(quat[0], quat[1], quat[2], quat[3]));
    let rotation_matrix: Rotation3<f64> = rotation.to_rotation_matrix();

    // Optional uniform scale between the centred, rotated sets.
    let scale = if allow_scaling {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in 0..num_vertices {
            let rotated_floating = rotation_matrix
                * (floating.features[i].position.coords - floating_centroid);
            let centred_corresponding =
                correspondences.features[i].position.coords - corresponding_centroid;
            numerator += weights[i] * centred_corresponding.dot(&rotated_floating);
            denominator += weights[i] * rotated_floating.norm_squared();
        }
        if denominator <= f64::EPSILON {
            return Err(RegisterError::NumericalFailure {
                details: "degenerate geometry in scale estimation".to_string(),
            });
        }
        numerator / denominator
    } else {
        1.0
    };
    if !scale.is_finite() || scale <= f64::EPSILON {
        return Err(RegisterError::NumericalFailure {
            details: format!("non-positive scale estimate {}", scale),
        });
    }

    let translation = corresponding_centroid - scale * (rotation * floating_centroid);
    let transform = RigidTransform::from_parts(rotation, translation, scale);

    for feature in &mut floating.features {
        feature.position = transform.transform_point(&feature.position);
        let rotated_normal = transform.rotate_vector(&feature.normal);
        let len_sq = rotated_normal.norm_squared();
        if len_sq > f64::EPSILON {
            feature.normal = rotated_normal / len_sq.sqrt();
        }
    }

    Ok(transform)
}
