//! Correspondence estimation between floating and target features.
//!
//! For every floating vertex, a corresponding feature is interpolated from
//! the target via weighted k-nearest-neighbour search in 6D feature space
//! (position + normal). The weights form a sparse row-stochastic affinity
//! matrix; corresponding features and flags are the affinity applied to the
//! target features and flags.
//!
//! The symmetric ("push-pull") variant additionally builds the reverse
//! target-to-floating affinity and fuses it in transposed form. Pure one-way
//! k-NN never sees target points that are nobody's nearest neighbour, which
//! lets boundaries drift; pulling those rows back in corrects for it.

use crate::spatial::FeatureIndex;
use crate::{Feature, RegisterError, RegisterResult, Surface};
use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Floor for squared feature distances in affinity weights.
const MIN_SQUARED_DISTANCE: f64 = 1e-12;

/// Weighted flags above this round to 1.0, the rest to 0.0. A correspondence
/// drawing more than 10% of its mass from invalid neighbours is invalid.
const FLAG_ROUNDING_LIMIT: f64 = 0.9;

/// Parameters for correspondence estimation.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CorrespondenceParams {
    /// Fuse the push-pull affinities instead of one-way k-NN. Default: true
    pub symmetric: bool,

    /// Number of nearest neighbours per affinity row. Default: 5
    pub num_neighbours: usize,
}

impl Default for CorrespondenceParams {
    fn default() -> Self {
        Self {
            symmetric: true,
            num_neighbours: 5,
        }
    }
}

impl CorrespondenceParams {
    /// Create params for one-way (asymmetric) correspondences.
    pub fn asymmetric() -> Self {
        Self {
            symmetric: false,
            ..Default::default()
        }
    }

    /// Set the number of nearest neighbours.
    pub fn with_num_neighbours(mut self, num_neighbours: usize) -> Self {
        self.num_neighbours = num_neighbours.max(1);
        self
    }
}

/// Per-floating-vertex correspondences: interpolated target features and
/// their rounded validity flags.
#[derive(Debug, Clone)]
pub struct Correspondences {
    /// Interpolated target feature per floating vertex.
    pub features: Vec<Feature>,

    /// Rounded validity flag per floating vertex, each 0.0 or 1.0.
    pub flags: Vec<f64>,
}

/// Sparse row-stochastic affinity matrix in CSR form.
///
/// Each row holds at most k non-zeros and sums to 1; applying the matrix to
/// the target features is O(rows x k) rather than O(rows x columns).
#[derive(Debug, Clone)]
pub struct Affinity {
    num_cols: usize,
    offsets: Vec<usize>,
    indices: Vec<u32>,
    weights: Vec<f64>,
}

impl Affinity {
    /// Build an affinity from per-row k-NN results, converting squared
    /// distances to normalized inverse-squared-distance weights.
    fn from_knn(rows: &[Vec<(usize, f64)>], num_cols: usize) -> Self {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut weights = Vec::new();

        offsets.push(0);
        for neighbours in rows {
            for &(index, dist_sq) in neighbours {
                indices.push(index as u32);
                weights.push(1.0 / dist_sq.max(MIN_SQUARED_DISTANCE));
            }
            offsets.push(indices.len());
        }

        let mut affinity = Self {
            num_cols,
            offsets,
            indices,
            weights,
        };
        affinity.normalize_rows();
        affinity
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.num_cols
    }

    /// Iterate over the `(column, weight)` entries of one row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (u32, f64)> + '_ {
        let range = self.offsets[row]..self.offsets[row + 1];
        self.indices[range.clone()]
            .iter()
            .copied()
            .zip(self.weights[range].iter().copied())
    }

    /// Sum of one row's weights (1.0 after normalization).
    pub fn row_sum(&self, row: usize) -> f64 {
        self.weights[self.offsets[row]..self.offsets[row + 1]]
            .iter()
            .sum()
    }

    /// Scale every row to sum to 1.
    fn normalize_rows(&mut self) {
        for row in 0..self.rows() {
            let range = self.offsets[row]..self.offsets[row + 1];
            let sum: f64 = self.weights[range.clone()].iter().sum();
            if sum > 0.0 {
                for weight in &mut self.weights[range] {
                    *weight /= sum;
                }
            }
        }
    }

    /// Fuse a forward affinity with the transpose of a backward affinity:
    /// `0.5 * (A_fw + A_bw^T)`, rows re-normalized.
    fn fuse_symmetric(forward: &Affinity, backward: &Affinity) -> Affinity {
        debug_assert_eq!(forward.rows(), backward.cols());
        debug_assert_eq!(forward.cols(), backward.rows());

        let mut row_maps: Vec<HashMap<u32, f64>> = vec![HashMap::new(); forward.rows()];

        for row in 0..forward.rows() {
            for (col, weight) in forward.row(row) {
                *row_maps[row].entry(col).or_insert(0.0) += 0.5 * weight;
            }
        }
        for row in 0..backward.rows() {
            for (col, weight) in backward.row(row) {
                *row_maps[col as usize].entry(row as u32).or_insert(0.0) += 0.5 * weight;
            }
        }

        let mut offsets = Vec::with_capacity(row_maps.len() + 1);
        let mut indices = Vec::new();
        let mut weights = Vec::new();

        offsets.push(0);
        for map in row_maps {
            let mut entries: Vec<(u32, f64)> = map.into_iter().collect();
            entries.sort_unstable_by_key(|&(col, _)| col);
            for (col, weight) in entries {
                indices.push(col);
                weights.push(weight);
            }
            offsets.push(indices.len());
        }

        let mut affinity = Affinity {
            num_cols: forward.num_cols,
            offsets,
            indices,
            weights,
        };
        affinity.normalize_rows();
        affinity
    }

    /// Apply the affinity to target features and flags.
    ///
    /// Returns the interpolated features and the unrounded weighted flags.
    fn apply(&self, target: &Surface) -> (Vec<Feature>, Vec<f64>) {
        let mut features = Vec::with_capacity(self.rows());
        let mut flags = Vec::with_capacity(self.rows());

        for row in 0..self.rows() {
            let mut position = Vector3::zeros();
            let mut normal = Vector3::zeros();
            let mut flag = 0.0;

            for (col, weight) in self.row(row) {
                let feature = &target.features[col as usize];
                position += weight * feature.position.coords;
                normal += weight * feature.normal;
                flag += weight * target.flags[col as usize];
            }

            features.push(Feature::new(Point3::from(position), normal));
            flags.push(flag);
        }

        (features, flags)
    }
}

/// Compute per-floating-vertex correspondences against the target.
///
/// Builds the (symmetric or asymmetric) affinity in 6D feature space and
/// applies it to the target features and flags. Returns
/// [`RegisterError::EmptyCorrespondence`] when every flag rounds to zero.
pub fn compute_correspondences(
    floating: &Surface,
    target: &Surface,
    params: &CorrespondenceParams,
) -> RegisterResult<Correspondences> {
    if floating.features.is_empty() || target.features.is_empty() {
        return Err(RegisterError::EmptyMesh {
            details: "cannot compute correspondences for empty meshes".to_string(),
        });
    }

    let num_neighbours = params.num_neighbours.max(1);

    let target_index = FeatureIndex::build(target.features.iter().map(|f| f.to_array()));
    let forward_rows: Vec<Vec<(usize, f64)>> = floating
        .features
        .par_iter()
        .map(|feature| target_index.knn(&feature.to_array(), num_neighbours))
        .collect();
    let forward = Affinity::from_knn(&forward_rows, target.vertex_count());

    let affinity = if params.symmetric {
        let floating_index = FeatureIndex::build(floating.features.iter().map(|f| f.to_array()));
        let backward_rows: Vec<Vec<(usize, f64)>> = target
            .features
            .par_iter()
            .map(|feature| floating_index.knn(&feature.to_array(), num_neighbours))
            .collect();
        let backward = Affinity::from_knn(&backward_rows, floating.vertex_count());
        Affinity::fuse_symmetric(&forward, &backward)
    } else {
        forward
    };

    let (features, weighted_flags) = affinity.apply(target);

    let flags: Vec<f64> = weighted_flags
        .into_iter()
        .map(|flag| if flag > FLAG_ROUNDING_LIMIT { 1.0 } else { 0.0 })
        .collect();

    if flags.iter().all(|&flag| flag == 0.0) {
        return Err(RegisterError::EmptyCorrespondence {
            details: format!(
                "all {} correspondences rounded to invalid",
                flags.len()
            ),
        });
    }

    Ok(Correspondences { features, flags })
}
