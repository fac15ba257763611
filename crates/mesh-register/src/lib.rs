//! Rigid and non-rigid registration of triangular surface meshes.
//!
//! This crate deforms a *floating* surface mesh so that its vertex positions
//! and normals align with a *target* mesh, even when the two differ in
//! vertex count, topology, and overlap. It is built for anatomical
//! shape-analysis pipelines that need dense point correspondences across
//! subjects: after registration, the floating mesh's vertices lie on the
//! target surface while keeping their original indexing.
//!
//! # Pipeline
//!
//! One registration iteration chains three stages:
//!
//! 1. **Correspondences**: every floating vertex is matched to a weighted
//!    blend of its nearest target features (position + normal), optionally
//!    fused symmetrically with the reverse matching.
//! 2. **Inlier weights**: a robust kernel over the residuals downweights
//!    unreliable matches and masks flagged-invalid regions.
//! 3. **Transformation**: either the closed-form weighted rigid (similarity)
//!    transform, or a viscoelastic update of a Gaussian-smoothed
//!    displacement field.
//!
//! The [`pyramid_registration`] scheduler composes these over a coarse-to-fine
//! hierarchy of decimated meshes, shifting the deformation from each level to
//! the next.
//!
//! # Quick start
//!
//! ```no_run
//! use mesh_register::{PyramidParams, Surface};
//!
//! let mut floating = Surface::load("scan.obj").unwrap();
//! let target = Surface::load("template.obj").unwrap();
//!
//! let result = floating.register_pyramid(&target, &PyramidParams::default()).unwrap();
//! println!("final residual: {:.4}", result.residual_history.last().unwrap());
//!
//! floating.save("registered.obj").unwrap();
//! ```
//!
//! # Example: rigid alignment only
//!
//! ```
//! use mesh_register::{RigidParams, Surface};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut floating = Surface::from_positions(
//!     vec![
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 0.0, 0.0),
//!         Point3::new(0.5, 1.0, 0.0),
//!         Point3::new(0.5, 0.5, 1.0),
//!     ],
//!     vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
//! );
//! let mut target = floating.clone();
//! target.translate(Vector3::new(0.2, 0.0, 0.0));
//!
//! let result = floating
//!     .register_rigid(&target, &RigidParams::default())
//!     .unwrap();
//! assert!(result.transform.translation().x > 0.1);
//! ```
//!
//! # Flags
//!
//! Every vertex carries a binary flag (1.0 = usable). Correspondences drawing
//! more than 10% of their weight from flagged-zero target vertices are
//! discarded, and flagged-zero floating vertices do not drive the
//! deformation. Flags default to all-ones; set them from an external mask
//! when parts of a mesh (scan borders, holes) should be ignored.
//!
//! # Errors
//!
//! Operations return [`RegisterResult`]. Malformed input (mismatched flag
//! lengths, out-of-range face indices, non-binary flags) is rejected before
//! any iteration runs; numerical failures and empty correspondence sets
//! abort the registration with a diagnostic.

mod error;
mod types;

pub mod correspondence;
pub mod downsample;
pub mod inlier;
pub mod io;
pub mod registration;
pub mod rigid;
pub mod scaleshift;
pub mod spatial;
pub mod viscoelastic;

// Re-export core types at the crate root
pub use error::{RegisterError, RegisterResult};
pub use types::{Feature, Surface};

// Re-export the registration entry points and their parameter/result types
pub use correspondence::{CorrespondenceParams, Correspondences, compute_correspondences};
pub use downsample::{DownsampleResult, downsample_mesh};
pub use inlier::compute_inlier_weights;
pub use io::{load_obj, read_obj_files, save_obj};
pub use registration::{
    LevelSummary, NonrigidParams, NonrigidResult, PyramidParams, PyramidResult, RigidParams,
    RigidResult, nonrigid_registration, pyramid_registration, rigid_registration,
};
pub use rigid::{RigidTransform, compute_rigid_transformation};
pub use scaleshift::scale_shift_mesh;
pub use viscoelastic::{DisplacementField, ViscoElasticParams, compute_nonrigid_transformation};

// Convenience methods on Surface
impl Surface {
    /// Load a surface from an OBJ file.
    pub fn load(path: impl AsRef<std::path::Path>) -> RegisterResult<Self> {
        io::load_obj(path.as_ref())
    }

    /// Save the surface to an OBJ file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> RegisterResult<()> {
        io::save_obj(self, path.as_ref())
    }

    /// Rigidly register this surface onto a target.
    pub fn register_rigid(
        &mut self,
        target: &Surface,
        params: &RigidParams,
    ) -> RegisterResult<RigidResult> {
        registration::rigid_registration(self, target, params)
    }

    /// Non-rigidly register this surface onto a target at full resolution.
    pub fn register_nonrigid(
        &mut self,
        target: &Surface,
        params: &NonrigidParams,
    ) -> RegisterResult<NonrigidResult> {
        registration::nonrigid_registration(self, target, params)
    }

    /// Register this surface onto a target through the coarse-to-fine
    /// pyramid.
    pub fn register_pyramid(
        &mut self,
        target: &Surface,
        params: &PyramidParams,
    ) -> RegisterResult<PyramidResult> {
        registration::pyramid_registration(self, target, params)
    }

    /// Downsample the surface, keeping a map to the original vertex indices.
    pub fn downsample(&self, ratio: f64) -> RegisterResult<DownsampleResult> {
        downsample::downsample_mesh(self, ratio)
    }
}
