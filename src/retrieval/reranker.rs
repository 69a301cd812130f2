//! Metadata-aware reranking
//!
//! Candidates are re-scored from four components: normalized similarity,
//! agreement with the known entity fields, record validity, and category
//! alignment. Nothing is dropped; the order is fully determined by the
//! scores and the record keys.

use crate::config::RerankConfig;
use crate::entities::{normalize_ticker, EntitySet};
use crate::retrieval::Candidate;
use crate::storage::ObservationRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Component weights of the composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RerankWeights {
    pub similarity: f32,
    pub field_match: f32,
    pub validity: f32,
    pub category: f32,
}

impl From<&RerankConfig> for RerankWeights {
    fn from(config: &RerankConfig) -> Self {
        Self {
            similarity: config.similarity_weight,
            field_match: config.field_match_weight,
            validity: config.validity_weight,
            category: config.category_weight,
        }
    }
}

/// Candidate with its score breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub record: ObservationRecord,
    pub similarity: f32,
    pub similarity_norm: f32,
    pub field_match: f32,
    pub validity: f32,
    pub category_alignment: f32,
    pub composite: f32,
}

pub struct MetadataReranker {
    weights: RerankWeights,
}

impl MetadataReranker {
    pub fn new(weights: RerankWeights) -> Self {
        Self { weights }
    }

    /// Score and order `candidates` against `entities`
    pub fn rerank(&self, candidates: Vec<Candidate>, entities: &EntitySet) -> Vec<RankedResult> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let (min, max) = candidates.iter().fold((f32::MAX, f32::MIN), |(lo, hi), c| {
            (lo.min(c.similarity), hi.max(c.similarity))
        });
        let range = max - min;

        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .map(|candidate| {
                let similarity_norm = if range > f32::EPSILON {
                    (candidate.similarity - min) / range
                } else {
                    1.0
                };
                let field_match = field_match(&candidate.record, entities);
                let validity = candidate.record.validity.clamp(0.0, 1.0);
                let category_alignment = match entities.category.known() {
                    Some(category) if *category != candidate.record.category => 0.0,
                    _ => 1.0,
                };
                let composite = self.weights.similarity * similarity_norm
                    + self.weights.field_match * field_match
                    + self.weights.validity * validity
                    + self.weights.category * category_alignment;

                RankedResult {
                    record: candidate.record,
                    similarity: candidate.similarity,
                    similarity_norm,
                    field_match,
                    validity,
                    category_alignment,
                    composite,
                }
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked
    }
}

/// Fraction of the known entity fields the record agrees with; 1.0 when
/// nothing is known
pub fn field_match(record: &ObservationRecord, entities: &EntitySet) -> f32 {
    let mut known = 0u32;
    let mut matched = 0u32;

    if let Some(company) = entities.company.known() {
        known += 1;
        if company.trim().eq_ignore_ascii_case(record.company.trim()) {
            matched += 1;
        }
    }
    if let Some(ticker) = entities.ticker.known() {
        known += 1;
        if normalize_ticker(ticker) == normalize_ticker(&record.ticker) {
            matched += 1;
        }
    }
    if let Some(year) = entities.year.known() {
        known += 1;
        if *year == record.year {
            matched += 1;
        }
    }
    if let Some(code) = entities.indicator_code.known() {
        known += 1;
        if code.eq_ignore_ascii_case(&record.indicator_code) {
            matched += 1;
        }
    }
    if let Some(category) = entities.category.known() {
        known += 1;
        if *category == record.category {
            matched += 1;
        }
    }

    if known == 0 {
        1.0
    } else {
        matched as f32 / known as f32
    }
}

fn compare_ranked(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then_with(|| b.field_match.total_cmp(&a.field_match))
        .then_with(|| b.validity.total_cmp(&a.validity))
        .then_with(|| a.record.company.cmp(&b.record.company))
        .then_with(|| a.record.year.cmp(&b.record.year))
        .then_with(|| a.record.indicator_code.cmp(&b.record.indicator_code))
        .then_with(|| a.record.id.cmp(&b.record.id))
}
