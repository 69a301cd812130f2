//! Candidate deduplication by record id

use crate::retrieval::Candidate;
use ahash::AHashSet;

/// Deduplicate candidates by record id, keeping the first (best) instance
///
/// # Arguments
/// * `candidates` - Candidates in similarity order, possibly with duplicates
///
/// # Returns
/// Deduplicated candidates, maintaining order
pub fn deduplicate_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen: AHashSet<String> = AHashSet::new();

    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.record.id.clone()))
        .collect()
}
