//! Wavefront OBJ input/output.
//!
//! Registration consumes and produces indexed triangle meshes, and dense
//! correspondence pipelines key everything off the vertex index, so the
//! loader preserves the file's vertex order exactly. It reads positions,
//! normals (recomputed from the faces unless the file carries one normal per
//! vertex, same order), and faces with fan triangulation of polygons. Flags
//! are not part of OBJ and default to all-ones.

use crate::{Feature, RegisterError, RegisterResult, Surface};
use nalgebra::{Point3, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Load a surface from an OBJ file.
pub fn load_obj(path: &Path) -> RegisterResult<Surface> {
    let file = File::open(path).map_err(|e| RegisterError::IoRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let parse_error = |line_number: usize, details: &str| RegisterError::ParseError {
        path: path.to_path_buf(),
        details: format!("line {}: {}", line_number, details),
    };

    let mut positions: Vec<Point3<f64>> = Vec::new();
    let mut normals: Vec<Vector3<f64>> = Vec::new();
    let mut faces: Vec<[u32; 3]> = Vec::new();
    // Normal indices in face records must mirror the vertex indices for the
    // file's normals to be usable per-vertex; otherwise they are recomputed.
    let mut normals_aligned = true;

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|e| RegisterError::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let mut coords = [0.0f64; 3];
                for coord in &mut coords {
                    *coord = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| parse_error(line_number, "malformed vertex"))?;
                }
                positions.push(Point3::new(coords[0], coords[1], coords[2]));
            }
            Some("vn") => {
                let mut coords = [0.0f64; 3];
                for coord in &mut coords {
                    *coord = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| parse_error(line_number, "malformed normal"))?;
                }
                normals.push(Vector3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let mut indices = Vec::with_capacity(4);
                for token in tokens {
                    let mut parts = token.split('/');
                    let vertex: usize = parts
                        .next()
                        .and_then(|t| t.parse().ok())
                        .filter(|&v| v >= 1)
                        .ok_or_else(|| parse_error(line_number, "malformed face index"))?;
                    // token forms: v, v/t, v//n, v/t/n
                    if let Some(normal) = parts.nth(1).filter(|t| !t.is_empty()) {
                        if normal.parse::<usize>().ok() != Some(vertex) {
                            normals_aligned = false;
                        }
                    }
                    indices.push((vertex - 1) as u32);
                }
                if indices.len() < 3 {
                    return Err(parse_error(line_number, "face with fewer than 3 vertices"));
                }
                // fan triangulation of polygonal faces
                for i in 1..indices.len() - 1 {
                    faces.push([indices[0], indices[i], indices[i + 1]]);
                }
            }
            _ => {} // comments, groups, materials
        }
    }

    let mut surface = Surface {
        features: positions
            .iter()
            .map(|&p| Feature::new(p, Vector3::zeros()))
            .collect(),
        faces,
        flags: vec![1.0; positions.len()],
    };

    if normals_aligned && normals.len() == positions.len() {
        for (feature, normal) in surface.features.iter_mut().zip(&normals) {
            let len_sq = normal.norm_squared();
            if len_sq > f64::EPSILON {
                feature.normal = normal / len_sq.sqrt();
            }
        }
    } else {
        debug!("OBJ normals absent or unaligned, recomputing from faces");
        surface.compute_normals();
    }

    surface.validate()?;

    info!(
        "loaded {}: {} vertices, {} faces",
        path.display(),
        surface.vertex_count(),
        surface.face_count()
    );

    Ok(surface)
}

/// Save a surface to an OBJ file (`v`, `vn`, and `f v//n` records).
pub fn save_obj(surface: &Surface, path: &Path) -> RegisterResult<()> {
    let io_err = |e: std::io::Error| RegisterError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "# OBJ file exported by mesh-register").map_err(io_err)?;

    for feature in &surface.features {
        writeln!(
            writer,
            "v {:.6} {:.6} {:.6}",
            feature.position.x, feature.position.y, feature.position.z
        )
        .map_err(io_err)?;
    }
    for feature in &surface.features {
        writeln!(
            writer,
            "vn {:.6} {:.6} {:.6}",
            feature.normal.x, feature.normal.y, feature.normal.z
        )
        .map_err(io_err)?;
    }

    // OBJ indices are 1-based; positions and normals share the index
    for face in &surface.faces {
        writeln!(
            writer,
            "f {}//{} {}//{} {}//{}",
            face[0] + 1,
            face[0] + 1,
            face[1] + 1,
            face[1] + 1,
            face[2] + 1,
            face[2] + 1
        )
        .map_err(io_err)?;
    }

    writer.flush().map_err(io_err)?;

    info!(
        "saved {}: {} vertices, {} faces",
        path.display(),
        surface.vertex_count(),
        surface.face_count()
    );

    Ok(())
}

/// Load a floating and a target mesh in one call.
pub fn read_obj_files(
    floating_path: &Path,
    target_path: &Path,
) -> RegisterResult<(Surface, Surface)> {
    Ok((load_obj(floating_path)?, load_obj(target_path)?))
}
