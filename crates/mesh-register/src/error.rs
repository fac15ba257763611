//! Error types for registration operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for registration operations.
pub type RegisterResult<T> = Result<T, RegisterError>;

/// Errors that can occur during mesh registration.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}: {source}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}: {source}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a mesh file.
    #[error("failed to parse mesh from {path}: {details}")]
    ParseError { path: PathBuf, details: String },

    /// Empty mesh (no vertices or faces).
    #[error("mesh is empty: {details}")]
    EmptyMesh { details: String },

    /// Structurally invalid input: mismatched row counts, non-binary flags,
    /// NaN/infinite coordinates, mismatched index lists.
    #[error("malformed input: {details}")]
    MalformedInput { details: String },

    /// Face references a vertex index outside the mesh.
    #[error("invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices")]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// A numerical subroutine failed: eigen solver non-convergence,
    /// degenerate (all-zero) weight sum.
    #[error("numerical failure: {details}")]
    NumericalFailure { details: String },

    /// Every correspondence was flagged invalid after rounding.
    #[error("no valid correspondences: {details}")]
    EmptyCorrespondence { details: String },
}
