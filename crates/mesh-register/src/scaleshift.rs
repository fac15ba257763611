//! Feature transfer between pyramid levels.
//!
//! Both a coarse level and the next finer level are downsampled from the same
//! finest mesh, so each carries an index list into it. Shifting scales means
//! moving the coarse level's deformed features onto the finer level's vertex
//! set: index-matched vertices take the coarse feature verbatim, and the rest
//! look up the nearest index-matched vertex by undeformed position and apply
//! that donor's displacement to their own undeformed position. No smoothing
//! happens here; the finer level's registration iterations take care of that.

use crate::spatial::PositionIndex;
use crate::{RegisterError, RegisterResult, Surface};
use hashbrown::HashMap;
use tracing::debug;

/// Transfer deformed coarse features onto the next finer level.
///
/// `previous` holds the coarse level's deformed surface and
/// `previous_indices` its map into the finest mesh. `next` enters holding the
/// finer level's *undeformed* features (with `next_indices` as its map) and
/// leaves holding the transferred deformation.
pub fn scale_shift_mesh(
    previous: &Surface,
    previous_indices: &[usize],
    next: &mut Surface,
    next_indices: &[usize],
) -> RegisterResult<()> {
    if previous.vertex_count() != previous_indices.len()
        || next.vertex_count() != next_indices.len()
    {
        return Err(RegisterError::MalformedInput {
            details: format!(
                "index lists ({}, {}) do not match vertex counts ({}, {})",
                previous_indices.len(),
                next_indices.len(),
                previous.vertex_count(),
                next.vertex_count()
            ),
        });
    }

    let coarse_by_original: HashMap<usize, usize> = previous_indices
        .iter()
        .enumerate()
        .map(|(coarse, &original)| (original, coarse))
        .collect();

    // Undeformed fine positions, captured before any feature is overwritten.
    let undeformed: Vec<_> = next.features.iter().map(|f| f.position).collect();

    let mut matched: Vec<(usize, usize)> = Vec::new(); // (fine, coarse)
    let mut unmatched: Vec<usize> = Vec::new();
    for (fine, &original) in next_indices.iter().enumerate() {
        match coarse_by_original.get(&original) {
            Some(&coarse) => matched.push((fine, coarse)),
            None => unmatched.push(fine),
        }
    }

    if matched.is_empty() {
        return Err(RegisterError::MalformedInput {
            details: "previous and next index lists share no original vertex".to_string(),
        });
    }

    for &(fine, coarse) in &matched {
        next.features[fine] = previous.features[coarse];
    }

    if !unmatched.is_empty() {
        let donor_index = PositionIndex::build(matched.iter().map(|&(fine, _)| {
            let p = undeformed[fine];
            [p.x, p.y, p.z]
        }));

        for &fine in &unmatched {
            let p = undeformed[fine];
            let nearest = donor_index.knn(&[p.x, p.y, p.z], 1)[0].0;
            let (donor_fine, donor_coarse) = matched[nearest];

            let displacement =
                previous.features[donor_coarse].position - undeformed[donor_fine];
            next.features[fine].position = undeformed[fine] + displacement;
            next.features[fine].normal = previous.features[donor_coarse].normal;
        }
    }

    debug!(
        "scale shift: {} matched, {} interpolated of {} fine vertices",
        matched.len(),
        unmatched.len(),
        next.vertex_count()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Feature;
    use nalgebra::{Point3, Vector3};

    fn line_surface(n: usize) -> Surface {
        // vertices along the x axis; faces are irrelevant to scale shifting
        let features: Vec<Feature> = (0..n)
            .map(|i| Feature::new(Point3::new(i as f64, 0.0, 0.0), Vector3::z()))
            .collect();
        Surface {
            flags: vec![1.0; features.len()],
            faces: Vec::new(),
            features,
        }
    }

    #[test]
    fn test_matched_features_are_bit_identical() {
        let mut coarse = line_surface(3);
        // deform the coarse level somewhere irrational
        for (i, feature) in coarse.features.iter_mut().enumerate() {
            feature.position.y += 0.1 * (i as f64) + std::f64::consts::PI;
            feature.normal = Vector3::new(0.3, 0.4, 0.5).normalize();
        }
        let coarse_indices = vec![0, 2, 4];

        let mut fine = line_surface(5);
        // fine level's undeformed positions: original vertex spacing
        for (feature, original) in fine.features.iter_mut().zip([0usize, 1, 2, 3, 4]) {
            feature.position = Point3::new(original as f64, 0.0, 0.0);
        }
        let fine_indices = vec![0, 1, 2, 3, 4];

        scale_shift_mesh(&coarse, &coarse_indices, &mut fine, &fine_indices).unwrap();

        // overlapping indices carry the coarse feature verbatim
        assert_eq!(fine.features[0], coarse.features[0]);
        assert_eq!(fine.features[2], coarse.features[1]);
        assert_eq!(fine.features[4], coarse.features[2]);
    }

    #[test]
    fn test_unmatched_vertices_get_donor_displacement() {
        let mut coarse = line_surface(2);
        coarse.features[0].position = Point3::new(0.0, 1.0, 0.0); // was (0,0,0)
        coarse.features[1].position = Point3::new(10.0, -2.0, 0.0); // was (10,0,0)
        let coarse_indices = vec![0, 10];

        let mut fine = line_surface(4);
        fine.features[0].position = Point3::new(0.0, 0.0, 0.0);
        fine.features[1].position = Point3::new(1.0, 0.0, 0.0);
        fine.features[2].position = Point3::new(9.0, 0.0, 0.0);
        fine.features[3].position = Point3::new(10.0, 0.0, 0.0);
        let fine_indices = vec![0, 1, 9, 10];

        scale_shift_mesh(&coarse, &coarse_indices, &mut fine, &fine_indices).unwrap();

        // vertex 1 is nearest to matched vertex 0: displaced by (0, 1, 0)
        assert!((fine.features[1].position - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-12);
        // vertex 2 is nearest to matched vertex 3: displaced by (0, -2, 0)
        assert!((fine.features[2].position - Point3::new(9.0, -2.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let coarse = line_surface(3);
        let mut fine = line_surface(4);
        let result = scale_shift_mesh(&coarse, &[0, 1], &mut fine, &[0, 1, 2, 3]);
        assert!(matches!(
            result,
            Err(RegisterError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_disjoint_index_sets_rejected() {
        let coarse = line_surface(3);
        let mut fine = line_surface(3);
        let result = scale_shift_mesh(&coarse, &[0, 1, 2], &mut fine, &[3, 4, 5]);
        assert!(matches!(
            result,
            Err(RegisterError::MalformedInput { .. })
        ));
    }
}
