//! Core surface data types.

use crate::{RegisterError, RegisterResult};
use nalgebra::{Point3, Vector3};

/// A per-vertex feature: position and unit normal.
///
/// This is the 6-vector the registration engine operates on. Normals are
/// expected to be unit length; every transform in this crate renormalizes
/// them after rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit surface normal.
    pub normal: Vector3<f64>,
}

impl Feature {
    /// Create a feature from a position and normal.
    #[inline]
    pub fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self { position, normal }
    }

    /// Create a feature from raw coordinates with a zero normal.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
            normal: Vector3::zeros(),
        }
    }

    /// Flatten to `[x, y, z, nx, ny, nz]` for feature-space queries.
    #[inline]
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.normal.x,
            self.normal.y,
            self.normal.z,
        ]
    }
}

/// A triangle surface mesh with per-vertex features and validity flags.
///
/// Faces are `[v0, v1, v2]` indices with counter-clockwise winding. Flags are
/// binary (1.0 = usable, 0.0 = excluded) and default to all-ones; they mark
/// regions such as masked-out scan borders that correspondences should not be
/// drawn from.
#[derive(Debug, Clone)]
pub struct Surface {
    /// Per-vertex features (position + normal).
    pub features: Vec<Feature>,

    /// Triangle faces as indices into the feature array.
    pub faces: Vec<[u32; 3]>,

    /// Per-vertex validity flags, same length as `features`.
    pub flags: Vec<f64>,
}

impl Surface {
    /// Create a new empty surface.
    pub fn new() -> Self {
        Self {
            features: Vec::new(),
            faces: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Build a surface from vertex positions and faces.
    ///
    /// Normals are computed from the faces and flags are set to all-ones.
    pub fn from_positions(positions: Vec<Point3<f64>>, faces: Vec<[u32; 3]>) -> Self {
        let flags = vec![1.0; positions.len()];
        let features = positions
            .into_iter()
            .map(|p| Feature::new(p, Vector3::zeros()))
            .collect();
        let mut surface = Self {
            features,
            faces,
            flags,
        };
        surface.compute_normals();
        surface
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.features.len()
    }

    /// Number of triangle faces.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the surface has no vertices or no faces.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty() || self.faces.is_empty()
    }

    /// Compute the axis-aligned bounding box.
    /// Returns `(min_corner, max_corner)` or `None` if the surface is empty.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        if self.features.is_empty() {
            return None;
        }

        let mut min = self.features[0].position;
        let mut max = self.features[0].position;

        for feature in &self.features[1..] {
            let p = &feature.position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Diagonal length of the bounding box, or 0.0 for an empty surface.
    pub fn bounding_diagonal(&self) -> f64 {
        self.bounds().map_or(0.0, |(min, max)| (max - min).norm())
    }

    /// Translate all vertex positions by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for feature in &mut self.features {
            feature.position += offset;
        }
    }

    /// Recompute per-vertex normals from the faces.
    ///
    /// Each vertex normal is the area-weighted average of its incident face
    /// normals (the unnormalized cross product has length 2x the face area),
    /// unit-normalized. Vertices without non-degenerate incident faces keep a
    /// zero normal.
    pub fn compute_normals(&mut self) {
        let mut accum: Vec<Vector3<f64>> = vec![Vector3::zeros(); self.features.len()];

        for &[i0, i1, i2] in &self.faces {
            let p0 = self.features[i0 as usize].position;
            let p1 = self.features[i1 as usize].position;
            let p2 = self.features[i2 as usize].position;

            let weighted_normal = (p1 - p0).cross(&(p2 - p0));

            accum[i0 as usize] += weighted_normal;
            accum[i1 as usize] += weighted_normal;
            accum[i2 as usize] += weighted_normal;
        }

        for (feature, n) in self.features.iter_mut().zip(accum) {
            let len_sq = n.norm_squared();
            if len_sq > f64::EPSILON {
                feature.normal = n / len_sq.sqrt();
            } else {
                feature.normal = Vector3::zeros();
            }
        }
    }

    /// Validate the surface for use as a registration input.
    ///
    /// Checks that the mesh is non-empty, that flags match the vertex count
    /// and are binary, that coordinates are finite, and that every face index
    /// is in range.
    pub fn validate(&self) -> RegisterResult<()> {
        if self.is_empty() {
            return Err(RegisterError::EmptyMesh {
                details: format!(
                    "{} vertices, {} faces",
                    self.vertex_count(),
                    self.face_count()
                ),
            });
        }

        if self.flags.len() != self.features.len() {
            return Err(RegisterError::MalformedInput {
                details: format!(
                    "{} flags for {} vertices",
                    self.flags.len(),
                    self.features.len()
                ),
            });
        }

        for (i, &flag) in self.flags.iter().enumerate() {
            if flag != 0.0 && flag != 1.0 {
                return Err(RegisterError::MalformedInput {
                    details: format!("flag {} at vertex {} is not binary", flag, i),
                });
            }
        }

        for (i, feature) in self.features.iter().enumerate() {
            if !feature.position.coords.iter().all(|c| c.is_finite()) {
                return Err(RegisterError::MalformedInput {
                    details: format!("non-finite coordinate at vertex {}", i),
                });
            }
        }

        let vertex_count = self.vertex_count();
        for (face_index, face) in self.faces.iter().enumerate() {
            for &vertex_index in face {
                if vertex_index as usize >= vertex_count {
                    return Err(RegisterError::InvalidVertexIndex {
                        face_index,
                        vertex_index,
                        vertex_count,
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn single_triangle() -> Surface {
        Surface::from_positions(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_feature_roundtrip() {
        let f = Feature::new(Point3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.0, 1.0));
        let a = f.to_array();
        assert_eq!(a, [1.0, 2.0, 3.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_triangle_normals() {
        let surface = single_triangle();
        for feature in &surface.features {
            assert!(approx_eq(feature.normal.x, 0.0));
            assert!(approx_eq(feature.normal.y, 0.0));
            assert!(approx_eq(feature.normal.z, 1.0));
        }
    }

    #[test]
    fn test_normals_unit_length() {
        let surface = single_triangle();
        for feature in &surface.features {
            assert!(approx_eq(feature.normal.norm(), 1.0));
        }
    }

    #[test]
    fn test_bounds() {
        let surface = Surface::from_positions(
            vec![
                Point3::new(-2.0, 0.0, 1.0),
                Point3::new(10.0, 5.0, 3.0),
                Point3::new(0.0, 8.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        let (min, max) = surface.bounds().expect("non-empty surface");
        assert!(approx_eq(min.x, -2.0));
        assert!(approx_eq(min.z, 0.0));
        assert!(approx_eq(max.x, 10.0));
        assert!(approx_eq(max.y, 8.0));
    }

    #[test]
    fn test_validate_empty() {
        let surface = Surface::new();
        assert!(matches!(
            surface.validate(),
            Err(RegisterError::EmptyMesh { .. })
        ));
    }

    #[test]
    fn test_validate_flag_length_mismatch() {
        let mut surface = single_triangle();
        surface.flags.pop();
        assert!(matches!(
            surface.validate(),
            Err(RegisterError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_validate_non_binary_flag() {
        let mut surface = single_triangle();
        surface.flags[1] = 0.5;
        assert!(matches!(
            surface.validate(),
            Err(RegisterError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_validate_face_index_out_of_range() {
        let mut surface = single_triangle();
        surface.faces.push([0, 1, 7]);
        assert!(matches!(
            surface.validate(),
            Err(RegisterError::InvalidVertexIndex {
                vertex_index: 7,
                ..
            })
        ));
    }

    #[test]
    fn test_translate() {
        let mut surface = single_triangle();
        surface.translate(Vector3::new(1.0, 2.0, 3.0));
        assert!(approx_eq(surface.features[0].position.x, 1.0));
        assert!(approx_eq(surface.features[0].position.y, 2.0));
        assert!(approx_eq(surface.features[0].position.z, 3.0));
    }
}
