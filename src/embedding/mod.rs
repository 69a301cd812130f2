/// Embedding & indexing
///
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local model embeddings (all-MiniLM-L6-v2, 384-dim)
/// - HashEmbedder for deterministic offline embeddings
/// - HNSW for approximate vector similarity search
mod provider;
mod vector_index;

pub use provider::{cosine_similarity, EmbeddingError, EmbeddingProvider, FastEmbedProvider, HashEmbedder};
pub use vector_index::{SearchResult, VectorIndex, VectorIndexError};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Build the provider named by the configuration
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "fastembed" => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => Err(EmbeddingError::InitializationError(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}
