//! End-to-end registration tests.
//!
//! These exercise the full pipelines (rigid, downsample, scale-shift,
//! pyramid) on synthetic closed meshes where the expected outcome is known.

use mesh_register::{
    PyramidParams, RigidParams, Surface, downsample_mesh, pyramid_registration,
    rigid_registration, scale_shift_mesh,
};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use std::collections::HashSet;

/// Unit cube centred on the origin.
fn make_cube() -> Surface {
    let s = 0.5;
    let positions = vec![
        Point3::new(-s, -s, -s),
        Point3::new(s, -s, -s),
        Point3::new(s, s, -s),
        Point3::new(-s, s, -s),
        Point3::new(-s, -s, s),
        Point3::new(s, -s, s),
        Point3::new(s, s, s),
        Point3::new(-s, s, s),
    ];
    let faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [3, 7, 6],
        [3, 6, 2],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    Surface::from_positions(positions, faces)
}

/// Closed torus grid: `major_segments * minor_segments` vertices.
fn make_torus(
    major_segments: usize,
    minor_segments: usize,
    major_radius: f64,
    minor_radius: f64,
) -> Surface {
    let mut positions = Vec::with_capacity(major_segments * minor_segments);
    for i in 0..major_segments {
        let theta = 2.0 * std::f64::consts::PI * i as f64 / major_segments as f64;
        for j in 0..minor_segments {
            let phi = 2.0 * std::f64::consts::PI * j as f64 / minor_segments as f64;
            let ring = major_radius + minor_radius * phi.cos();
            positions.push(Point3::new(
                ring * theta.cos(),
                ring * theta.sin(),
                minor_radius * phi.sin(),
            ));
        }
    }

    let index = |i: usize, j: usize| {
        ((i % major_segments) * minor_segments + (j % minor_segments)) as u32
    };
    let mut faces = Vec::with_capacity(2 * major_segments * minor_segments);
    for i in 0..major_segments {
        for j in 0..minor_segments {
            let a = index(i, j);
            let b = index(i + 1, j);
            let c = index(i + 1, j + 1);
            let d = index(i, j + 1);
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }

    Surface::from_positions(positions, faces)
}

fn mean_position_error(a: &Surface, b: &Surface) -> f64 {
    a.features
        .iter()
        .zip(&b.features)
        .map(|(x, y)| (x.position - y.position).norm())
        .sum::<f64>()
        / a.vertex_count() as f64
}

fn rms_position_error(a: &Surface, b: &Surface) -> f64 {
    let sum: f64 = a
        .features
        .iter()
        .zip(&b.features)
        .map(|(x, y)| (x.position - y.position).norm_squared())
        .sum();
    (sum / a.vertex_count() as f64).sqrt()
}

#[test]
fn test_rigid_recovers_cube_translation() {
    let target = make_cube();
    let mut floating = make_cube();
    floating.translate(Vector3::new(0.1, 0.1, 0.1));

    rigid_registration(&mut floating, &target, &RigidParams::default()).unwrap();

    let error = mean_position_error(&floating, &target);
    assert!(error < 1e-4, "mean position error {}", error);
}

#[test]
fn test_rigid_recovers_cube_rotation() {
    let target = make_cube();
    let angle = 30.0_f64.to_radians();
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle);
    let mut floating = make_cube();
    for feature in &mut floating.features {
        feature.position = rotation * feature.position;
        feature.normal = rotation * feature.normal;
    }

    let result = rigid_registration(&mut floating, &target, &RigidParams::default()).unwrap();

    // the accumulated transform undoes the applied rotation
    assert!(
        (result.transform.rotation().angle() - angle).abs() < 1e-3,
        "recovered angle {}",
        result.transform.rotation().angle()
    );
    let error = mean_position_error(&floating, &target);
    assert!(error < 1e-4, "mean position error {}", error);
}

#[test]
fn test_downsample_torus_to_half() {
    let torus = make_torus(40, 25, 10.0, 3.0);
    assert_eq!(torus.vertex_count(), 1000);

    let result = downsample_mesh(&torus, 0.5).unwrap();

    let count = result.surface.vertex_count();
    assert!(
        (499..=501).contains(&count),
        "downsampled vertex count {}",
        count
    );

    let unique: HashSet<usize> = result.original_indices.iter().copied().collect();
    assert_eq!(unique.len(), count, "original indices must be distinct");
    assert!(result.original_indices.iter().all(|&i| i < 1000));
}

#[test]
fn test_scale_shift_matches_overlapping_indices_exactly() {
    let torus = make_torus(20, 10, 10.0, 3.0);
    let mut coarse = downsample_mesh(&torus, 0.6).unwrap();

    // deform the coarse level
    for (k, feature) in coarse.surface.features.iter_mut().enumerate() {
        feature.position.z += 0.01 * (k as f64).sin() + 0.3;
        feature.normal = Vector3::new(0.1, 0.2, 0.3).normalize();
    }

    let mut fine = torus.clone();
    let fine_indices: Vec<usize> = (0..torus.vertex_count()).collect();

    scale_shift_mesh(
        &coarse.surface,
        &coarse.original_indices,
        &mut fine,
        &fine_indices,
    )
    .unwrap();

    // features at overlapping indices are bit-identical to the coarse values
    for (k, &original) in coarse.original_indices.iter().enumerate() {
        assert_eq!(fine.features[original], coarse.surface.features[k]);
    }
}

#[test]
fn test_pyramid_identity_registration() {
    let target = make_torus(20, 12, 10.0, 3.0);
    let mut floating = target.clone();
    let diagonal = floating.bounding_diagonal();

    let params = PyramidParams::default().with_num_iterations(12);
    pyramid_registration(&mut floating, &target, &params).unwrap();

    let rms = rms_position_error(&floating, &target);
    assert!(rms < 1e-4 * diagonal, "rms displacement {}", rms);
}

#[test]
fn test_pyramid_recovers_smooth_deformation() {
    let target = make_torus(40, 25, 10.0, 3.0);

    // smooth low-frequency bump along the torus
    let mut floating = target.clone();
    for feature in &mut floating.features {
        let theta = feature.position.y.atan2(feature.position.x);
        feature.position.z += 0.3 * theta.sin();
    }
    floating.compute_normals();

    let initial_rms = rms_position_error(&floating, &target);
    let result =
        pyramid_registration(&mut floating, &target, &PyramidParams::default()).unwrap();
    let final_rms = rms_position_error(&floating, &target);

    // >= 80% of the deformation recovered
    assert!(
        final_rms <= 0.2 * initial_rms,
        "rms error {} -> {}",
        initial_rms,
        final_rms
    );

    // residuals trend downwards across the run
    let first = result.residual_history.first().copied().unwrap();
    let last = result.residual_history.last().copied().unwrap();
    assert!(last < first, "residuals {} -> {}", first, last);

    // normals stay unit length through the whole pipeline
    for feature in &floating.features {
        assert!((feature.normal.norm() - 1.0).abs() < 1e-5);
    }

    // three levels, coarsest first
    assert_eq!(result.levels.len(), 3);
    assert!(result.levels[0].floating_vertices < result.levels[2].floating_vertices);
}

#[test]
fn test_pyramid_respects_flagged_target_regions() {
    let target = make_torus(20, 10, 10.0, 3.0);
    let mut floating = target.clone();
    floating.translate(Vector3::new(0.2, 0.0, 0.0));

    // flag away a patch of the target; registration must still run
    let mut flagged_target = target.clone();
    for flag in flagged_target.flags.iter_mut().take(20) {
        *flag = 0.0;
    }

    let params = PyramidParams::default().with_num_iterations(9);
    let result = pyramid_registration(&mut floating, &flagged_target, &params).unwrap();
    assert_eq!(result.levels.len(), 3);
}
