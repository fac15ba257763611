//! Benchmarks for the registration stages.
//!
//! Run with: cargo bench -p mesh-register

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mesh_register::{
    CorrespondenceParams, NonrigidParams, Surface, compute_correspondences, downsample_mesh,
    nonrigid_registration,
};
use nalgebra::{Point3, Vector3};

/// Closed torus grid with `major * minor` vertices.
fn make_torus(major: usize, minor: usize) -> Surface {
    let mut positions = Vec::with_capacity(major * minor);
    for i in 0..major {
        let theta = 2.0 * std::f64::consts::PI * i as f64 / major as f64;
        for j in 0..minor {
            let phi = 2.0 * std::f64::consts::PI * j as f64 / minor as f64;
            let ring = 10.0 + 3.0 * phi.cos();
            positions.push(Point3::new(
                ring * theta.cos(),
                ring * theta.sin(),
                3.0 * phi.sin(),
            ));
        }
    }

    let index = |i: usize, j: usize| ((i % major) * minor + (j % minor)) as u32;
    let mut faces = Vec::with_capacity(2 * major * minor);
    for i in 0..major {
        for j in 0..minor {
            faces.push([index(i, j), index(i + 1, j), index(i + 1, j + 1)]);
            faces.push([index(i, j), index(i + 1, j + 1), index(i, j + 1)]);
        }
    }

    Surface::from_positions(positions, faces)
}

fn bench_correspondences(c: &mut Criterion) {
    let mut group = c.benchmark_group("correspondences");

    for &size in &[500usize, 2000] {
        let minor = 25;
        let floating = make_torus(size / minor, minor);
        let mut target = floating.clone();
        target.translate(Vector3::new(0.1, 0.0, 0.0));

        for (name, params) in [
            ("asymmetric", CorrespondenceParams::asymmetric()),
            ("symmetric", CorrespondenceParams::default()),
        ] {
            group.bench_with_input(
                BenchmarkId::new(name, size),
                &(&floating, &target),
                |b, (floating, target)| {
                    b.iter(|| {
                        compute_correspondences(
                            black_box(floating),
                            black_box(target),
                            &params,
                        )
                        .unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_downsample(c: &mut Criterion) {
    let torus = make_torus(40, 25);
    c.bench_function("downsample_90pct_1000v", |b| {
        b.iter(|| downsample_mesh(black_box(&torus), 0.9).unwrap());
    });
}

fn bench_nonrigid_iteration(c: &mut Criterion) {
    let target = make_torus(20, 25);
    let mut deformed = target.clone();
    deformed.translate(Vector3::new(0.2, 0.1, 0.0));

    let params = NonrigidParams::default()
        .with_num_iterations(1)
        .with_viscous_iterations(5, 5)
        .with_elastic_iterations(5, 5);

    c.bench_function("nonrigid_iteration_500v", |b| {
        b.iter(|| {
            let mut floating = deformed.clone();
            nonrigid_registration(black_box(&mut floating), black_box(&target), &params)
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_correspondences,
    bench_downsample,
    bench_nonrigid_iteration
);
criterion_main!(benches);
