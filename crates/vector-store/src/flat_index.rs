use crate::error::{Result, VectorStoreError};

/// One nearest-neighbor match: a position into the aligned metadata array
/// and the squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Exact nearest-neighbor index over fixed-dimension vectors.
///
/// Vectors are stored contiguously in insertion order; the position
/// returned by [`FlatIndex::push`] is stable for the lifetime of the
/// index. Brute-force search is the reference algorithm at this corpus
/// scale, so there is no approximate-search trade-off.
#[derive(Debug)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// # Panics
    ///
    /// Panics when `dimension` is zero; vectors always have at least one
    /// component.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "vector dimension must be nonzero");
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Rebuilds an index from a flat buffer, e.g. the persisted artifact.
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorStoreError::InvalidDimension {
                expected: 1,
                actual: 0,
            });
        }
        if data.len() % dimension != 0 {
            return Err(VectorStoreError::ArtifactInconsistency(format!(
                "vector buffer length {} is not a multiple of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self { dimension, data })
    }

    /// Appends a vector and returns its position.
    pub fn push(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// Exact k-nearest-neighbor search under squared L2, ascending by
    /// distance (ties broken by position). Returns at most `k` matches;
    /// fewer when the index holds fewer vectors, empty for an empty index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn search_orders_by_ascending_distance() {
        let mut index = FlatIndex::new(3);
        index.push(&[1.0, 0.0, 0.0]).unwrap();
        index.push(&[0.0, 1.0, 0.0]).unwrap();
        index.push(&[0.9, 0.1, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].position, 0);
        assert!(results[0].distance.abs() < 1e-6);
        assert_eq!(results[1].position, 2);
        assert_eq!(results[2].position, 1);
        assert!(results[1].distance < results[2].distance);
    }

    #[test]
    fn k_larger_than_corpus_returns_all() {
        let mut index = FlatIndex::new(2);
        index.push(&[0.0, 0.0]).unwrap();
        index.push(&[1.0, 1.0]).unwrap();

        let results = index.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn empty_index_returns_no_matches() {
        let index = FlatIndex::new(4);
        let results = index.search(&[0.0; 4], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = FlatIndex::new(3);
        assert!(index.push(&[1.0, 0.0]).is_err());

        index.push(&[1.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn positions_follow_insertion_order() {
        let mut index = FlatIndex::new(1);
        assert_eq!(index.push(&[0.0]).unwrap(), 0);
        assert_eq!(index.push(&[1.0]).unwrap(), 1);
        assert_eq!(index.push(&[2.0]).unwrap(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    #[should_panic(expected = "vector dimension must be nonzero")]
    fn zero_dimension_is_rejected_at_construction() {
        let _ = FlatIndex::new(0);
    }

    #[test]
    fn from_flat_rejects_ragged_buffers() {
        assert!(FlatIndex::from_flat(3, vec![0.0; 7]).is_err());
        let index = FlatIndex::from_flat(3, vec![0.0; 6]).unwrap();
        assert_eq!(index.len(), 2);
    }
}
