//! Mesh downsampling by edge collapse with quadric error metrics.
//!
//! Pyramid levels are built by collapsing edges until a target vertex count
//! is reached. Collapses are halfedge-style: one endpoint is removed and the
//! survivor keeps its original position, so every downsampled vertex *is* an
//! original vertex and the result carries an injective map back to the
//! original indices. The scale shifter relies on both properties.
//!
//! Edges whose endpoint flags differ are never collapsed, preserving the
//! outline of flagged-invalid regions. Mesh-boundary edges may collapse but
//! carry a cost penalty.

use crate::{RegisterResult, Surface};
use nalgebra::{Matrix4, Point3, Vector4};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

/// Cost multiplier for collapsing mesh-boundary edges.
const BOUNDARY_PENALTY: f64 = 10.0;

/// Never collapse below this many vertices.
const MIN_VERTICES: usize = 3;

/// Result of downsampling a surface.
#[derive(Debug, Clone)]
pub struct DownsampleResult {
    /// The downsampled surface (normals recomputed from the new faces).
    pub surface: Surface,

    /// For each downsampled vertex, its index in the original surface.
    /// Injective; identity when the ratio is 0.
    pub original_indices: Vec<usize>,
}

/// Accumulated quadric error form of a vertex.
///
/// Every incident face contributes the outer product `p * p^T` of its plane
/// `p = [n, d]` (unit normal, `n . x + d = 0`), so `v^T Q v` with
/// `v = [x, y, z, 1]` is the summed squared distance of a point to all of
/// the vertex's planes.
#[derive(Debug, Clone, Copy)]
struct Quadric(Matrix4<f64>);

impl Quadric {
    fn zero() -> Self {
        Self(Matrix4::zeros())
    }

    fn from_plane(plane: Vector4<f64>) -> Self {
        Self(plane * plane.transpose())
    }

    fn add(&mut self, other: &Quadric) {
        self.0 += other.0;
    }

    /// Summed squared plane distance of a point.
    fn evaluate(&self, point: &Point3<f64>) -> f64 {
        let v = point.to_homogeneous();
        v.dot(&(self.0 * v))
    }
}

/// A directed halfedge-collapse candidate: remove `from`, keep `to`.
/// Ordered so the cheapest collapse pops first from a `BinaryHeap`.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    from: u32,
    to: u32,
    cost: f64,
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost)
    }
}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EdgeCollapse {}

/// Downsample a surface to `round(N * (1 - ratio))` vertices.
///
/// `ratio` is the fraction of vertices to remove (0.9 = 90% decimation).
/// A ratio of 0 returns a copy of the input with the identity index map.
pub fn downsample_mesh(surface: &Surface, ratio: f64) -> RegisterResult<DownsampleResult> {
    surface.validate()?;

    let num_vertices = surface.vertex_count();
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio <= 0.0 {
        return Ok(DownsampleResult {
            surface: surface.clone(),
            original_indices: (0..num_vertices).collect(),
        });
    }

    let target = (((num_vertices as f64) * (1.0 - ratio)).round() as usize).max(MIN_VERTICES);
    if target >= num_vertices {
        return Ok(DownsampleResult {
            surface: surface.clone(),
            original_indices: (0..num_vertices).collect(),
        });
    }

    let mut quadrics = compute_vertex_quadrics(surface);
    let boundary_edges = find_boundary_edges(&surface.faces);

    // Mutable connectivity: face list with liveness, per-vertex incident
    // faces, and a neighbour set per vertex.
    let mut faces: Vec<[u32; 3]> = surface.faces.clone();
    let mut face_alive = vec![true; faces.len()];
    let mut vertex_alive = vec![true; num_vertices];
    let mut vertex_faces: Vec<Vec<usize>> = vec![Vec::new(); num_vertices];
    let mut neighbours: Vec<HashSet<u32>> = vec![HashSet::new(); num_vertices];
    for (face_index, face) in faces.iter().enumerate() {
        for k in 0..3 {
            vertex_faces[face[k] as usize].push(face_index);
            neighbours[face[k] as usize].insert(face[(k + 1) % 3]);
            neighbours[face[k] as usize].insert(face[(k + 2) % 3]);
        }
    }

    // Candidates are queued in sorted neighbour order so the result is a
    // pure function of the input; hash-set iteration order would otherwise
    // leak into cost ties.
    let mut heap = BinaryHeap::new();
    for (vertex, vertex_neighbours) in neighbours.iter().enumerate() {
        let mut sorted: Vec<u32> = vertex_neighbours.iter().copied().collect();
        sorted.sort_unstable();
        for neighbour in sorted {
            push_candidate(
                vertex as u32,
                neighbour,
                surface,
                &quadrics,
                &boundary_edges,
                &mut heap,
            );
        }
    }

    let mut active_vertices = num_vertices;
    let mut active_faces = faces.len();
    let mut collapses = 0usize;

    loop {
        let collapses_before = collapses;

        while active_vertices > target && active_faces > 0 {
            let Some(candidate) = heap.pop() else {
                break;
            };
            let from = candidate.from as usize;
            let to = candidate.to as usize;

            // Lazy deletion: stale entries reference dead vertices or pairs
            // that are no longer connected.
            if !vertex_alive[from] || !vertex_alive[to] {
                continue;
            }
            if !neighbours[from].contains(&candidate.to) {
                continue;
            }
            if !is_collapse_manifold(&neighbours, candidate.from, candidate.to) {
                continue;
            }

            // Collapse: merge `from` into `to`.
            let from_quadric = quadrics[from];
            quadrics[to].add(&from_quadric);
            vertex_alive[from] = false;
            active_vertices -= 1;
            collapses += 1;

            let incident = std::mem::take(&mut vertex_faces[from]);
            for face_index in incident {
                if !face_alive[face_index] {
                    continue;
                }
                let face = &mut faces[face_index];
                for index in face.iter_mut() {
                    if *index == candidate.from {
                        *index = candidate.to;
                    }
                }
                if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                    face_alive[face_index] = false;
                    active_faces -= 1;
                } else {
                    vertex_faces[to].push(face_index);
                }
            }

            let from_neighbours = std::mem::take(&mut neighbours[from]);
            for neighbour in from_neighbours {
                neighbours[neighbour as usize].remove(&candidate.from);
                if neighbour != candidate.to {
                    neighbours[neighbour as usize].insert(candidate.to);
                    neighbours[to].insert(neighbour);
                }
            }

            // Re-queue the survivor's edges with updated quadric costs.
            let mut to_neighbours: Vec<u32> = neighbours[to].iter().copied().collect();
            to_neighbours.sort_unstable();
            for neighbour in to_neighbours {
                push_candidate(
                    candidate.to,
                    neighbour,
                    surface,
                    &quadrics,
                    &boundary_edges,
                    &mut heap,
                );
                push_candidate(
                    neighbour,
                    candidate.to,
                    surface,
                    &quadrics,
                    &boundary_edges,
                    &mut heap,
                );
            }
        }

        if active_vertices <= target || active_faces == 0 {
            break;
        }

        // The heap drained before the target was met. Entries rejected while
        // the local topology was unfavourable are not re-queued unless a
        // nearby collapse touches them, so rebuild once from the surviving
        // edges; stop for good when a rebuild makes no progress.
        if collapses == collapses_before {
            warn!(
                "downsample target {} not reached: {} vertices remain",
                target, active_vertices
            );
            break;
        }
        for (vertex, vertex_neighbours) in neighbours.iter().enumerate() {
            if !vertex_alive[vertex] {
                continue;
            }
            let mut sorted: Vec<u32> = vertex_neighbours.iter().copied().collect();
            sorted.sort_unstable();
            for neighbour in sorted {
                push_candidate(
                    vertex as u32,
                    neighbour,
                    surface,
                    &quadrics,
                    &boundary_edges,
                    &mut heap,
                );
            }
        }
    }

    // Compact survivors in original order.
    let mut original_indices = Vec::with_capacity(active_vertices);
    let mut remap: HashMap<u32, u32> = HashMap::with_capacity(active_vertices);
    let mut features = Vec::with_capacity(active_vertices);
    let mut flags = Vec::with_capacity(active_vertices);
    for (index, &alive) in vertex_alive.iter().enumerate() {
        if alive {
            remap.insert(index as u32, original_indices.len() as u32);
            original_indices.push(index);
            features.push(surface.features[index]);
            flags.push(surface.flags[index]);
        }
    }

    let mut new_faces = Vec::with_capacity(active_faces);
    for (face_index, face) in faces.iter().enumerate() {
        if face_alive[face_index] {
            new_faces.push([remap[&face[0]], remap[&face[1]], remap[&face[2]]]);
        }
    }

    let mut downsampled = Surface {
        features,
        faces: new_faces,
        flags,
    };
    downsampled.compute_normals();

    debug!(
        "downsampled {} -> {} vertices ({} collapses, ratio {:.2})",
        num_vertices,
        downsampled.vertex_count(),
        collapses,
        ratio
    );

    Ok(DownsampleResult {
        surface: downsampled,
        original_indices,
    })
}

/// Accumulate the plane quadrics of all incident faces per vertex.
fn compute_vertex_quadrics(surface: &Surface) -> Vec<Quadric> {
    let mut quadrics = vec![Quadric::zero(); surface.vertex_count()];

    for face in &surface.faces {
        let p0 = surface.features[face[0] as usize].position;
        let p1 = surface.features[face[1] as usize].position;
        let p2 = surface.features[face[2] as usize].position;

        let cross = (p1 - p0).cross(&(p2 - p0));
        let len = cross.norm();
        if len < 1e-10 {
            continue; // degenerate face
        }
        let normal = cross / len;

        let plane = Vector4::new(normal.x, normal.y, normal.z, -normal.dot(&p0.coords));
        let q = Quadric::from_plane(plane);
        for &vertex in face {
            quadrics[vertex as usize].add(&q);
        }
    }

    quadrics
}

/// Edges with exactly one incident face.
fn find_boundary_edges(faces: &[[u32; 3]]) -> HashSet<(u32, u32)> {
    let mut edge_counts: HashMap<(u32, u32), u32> = HashMap::new();
    for face in faces {
        for k in 0..3 {
            let edge = normalize_edge(face[k], face[(k + 1) % 3]);
            *edge_counts.entry(edge).or_insert(0) += 1;
        }
    }
    edge_counts
        .into_iter()
        .filter_map(|(edge, count)| (count == 1).then_some(edge))
        .collect()
}

/// Normalize an edge so the smaller index comes first.
fn normalize_edge(v1: u32, v2: u32) -> (u32, u32) {
    if v1 < v2 { (v1, v2) } else { (v2, v1) }
}

/// Queue the collapse of `from` into `to`, unless the edge crosses a flag
/// transition. The survivor keeps its position, so the cost is the combined
/// quadric evaluated there.
fn push_candidate(
    from: u32,
    to: u32,
    surface: &Surface,
    quadrics: &[Quadric],
    boundary_edges: &HashSet<(u32, u32)>,
    heap: &mut BinaryHeap<EdgeCollapse>,
) {
    if surface.flags[from as usize] != surface.flags[to as usize] {
        return;
    }

    let mut combined = quadrics[from as usize];
    combined.add(&quadrics[to as usize]);

    let kept = surface.features[to as usize].position;
    let mut cost = combined.evaluate(&kept);

    if boundary_edges.contains(&normalize_edge(from, to)) {
        cost *= BOUNDARY_PENALTY;
    }

    heap.push(EdgeCollapse { from, to, cost });
}

/// A collapse is manifold-safe when the endpoints share at most two
/// neighbours (the apexes of the two triangles flanking the edge).
fn is_collapse_manifold(neighbours: &[HashSet<u32>], from: u32, to: u32) -> bool {
    let smaller;
    let larger;
    if neighbours[from as usize].len() <= neighbours[to as usize].len() {
        smaller = &neighbours[from as usize];
        larger = &neighbours[to as usize];
    } else {
        smaller = &neighbours[to as usize];
        larger = &neighbours[from as usize];
    }
    smaller.iter().filter(|v| larger.contains(v)).count() <= 2
}
