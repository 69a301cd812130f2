//! Retrieval & reranking
//!
//! Entity-driven similarity search over the observation store, with a
//! structural prefilter and metadata-aware reranking of the candidates.

mod client;
mod deduplication;
mod reranker;
mod store;

pub use client::{Candidate, RetrievalClient, RetrievalOutcome};
pub use deduplication::deduplicate_candidates;
pub use reranker::{field_match, MetadataReranker, RankedResult, RerankWeights};
pub use store::{ImportSummary, ObservationStore, VectorStore};
