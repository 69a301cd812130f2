/// HNSW vector index for similarity search
use hnsw_rs::prelude::*;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },
}

impl From<VectorIndexError> for crate::error::MemoragError {
    fn from(e: VectorIndexError) -> Self {
        crate::error::MemoragError::ExternalServiceUnavailable {
            service: "vector index".to_string(),
            message: e.to_string(),
        }
    }
}

/// Search result with ID and similarity score
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Row id of the stored embedding
    pub id: u64,
    /// Cosine similarity (1 - cosine distance)
    pub score: f32,
}

/// HNSW vector index wrapper
///
/// Approximate nearest-neighbour search under cosine distance. The index is
/// in-memory only and is rebuilt from the embeddings table at startup.
pub struct VectorIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    dimension: usize,
    max_elements: usize,
    count: RwLock<usize>,
}

impl VectorIndex {
    /// Create a new vector index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match embedding dimension)
    /// * `max_elements` - Expected upper bound on indexed vectors
    /// * `m` - HNSW M parameter (connections per layer)
    /// * `ef_construction` - HNSW construction parameter
    pub fn new(dimension: usize, max_elements: usize, m: usize, ef_construction: usize) -> Self {
        let max_layer = 16;
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            max_elements,
            max_layer,
            ef_construction,
            DistCosine {},
        );

        Self {
            index: RwLock::new(index),
            dimension,
            max_elements,
            count: RwLock::new(0),
        }
    }

    /// Insert a vector under `id`
    pub fn insert(&self, id: u64, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut count = self
            .count
            .write()
            .map_err(|e| VectorIndexError::InsertError(e.to_string()))?;
        if *count >= self.max_elements {
            return Err(VectorIndexError::CapacityExceeded {
                capacity: self.max_elements,
            });
        }

        let index = self
            .index
            .read()
            .map_err(|e| VectorIndexError::InsertError(e.to_string()))?;
        index.insert_slice((vector, id as usize));
        *count += 1;

        Ok(())
    }

    /// Search for k nearest neighbors, sorted by similarity descending
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<SearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let index = self
            .index
            .read()
            .map_err(|e| VectorIndexError::SearchError(e.to_string()))?;

        let mut results: Vec<SearchResult> = index
            .search(query, k, ef_search.max(k))
            .into_iter()
            .map(|neighbour| SearchResult {
                id: neighbour.d_id as u64,
                score: 1.0 - neighbour.distance,
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        Ok(results)
    }

    /// Number of vectors in the index
    pub fn len(&self) -> usize {
        self.count.read().map(|c| *c).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
