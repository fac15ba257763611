//! Spatial index for k-nearest-neighbour and radius queries.
//!
//! Registration queries two spaces: plain 3D positions (smoothing
//! neighbourhoods) and 6D position+normal features (correspondence search).
//! Both go through the same k-d tree wrapper, monomorphized on the dimension.
//!
//! The floating side moves every iteration, so its index is rebuilt per
//! iteration; a target index can be cached while the target is static.

use kiddo::SquaredEuclidean;

/// A k-d tree over `K`-dimensional points, queried by index.
pub struct SpatialIndex<const K: usize> {
    tree: kiddo::KdTree<f64, K>,
    len: usize,
}

/// Index over 3D positions.
pub type PositionIndex = SpatialIndex<3>;

/// Index over 6D position+normal features.
pub type FeatureIndex = SpatialIndex<6>;

impl<const K: usize> SpatialIndex<K> {
    /// Build an index from a sequence of points.
    pub fn build(points: impl IntoIterator<Item = [f64; K]>) -> Self {
        let mut tree = kiddo::KdTree::new();
        let mut len = 0;
        for (i, point) in points.into_iter().enumerate() {
            tree.add(&point, i as u64);
            len += 1;
        }
        Self { tree, len }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find the `k` nearest points to `query`.
    ///
    /// Returns `(index, squared distance)` pairs sorted by ascending
    /// distance. `k` is clamped to the number of indexed points.
    pub fn knn(&self, query: &[f64; K], k: usize) -> Vec<(usize, f64)> {
        let k = k.min(self.len);
        self.tree
            .nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|n| (n.item as usize, n.distance))
            .collect()
    }

    /// Find all points within `radius` of `query`.
    ///
    /// Returns `(index, squared distance)` pairs sorted by ascending
    /// distance; the result length varies per query.
    pub fn within(&self, query: &[f64; K], radius: f64) -> Vec<(usize, f64)> {
        self.tree
            .within::<SquaredEuclidean>(query, radius * radius)
            .into_iter()
            .map(|n| (n.item as usize, n.distance))
            .collect()
    }
}
