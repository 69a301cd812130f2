//! Short observations about a ranked result set, kept with each turn

use crate::retrieval::RankedResult;

/// Raw similarity above which a result counts as highly relevant
const HIGH_SIMILARITY: f32 = 0.8;

/// Companies named before the list is cut short
const COMPANIES_SHOWN: usize = 3;

pub const NO_RESULTS_INSIGHT: &str = "No matching records found";

/// Relevance, completeness, company and year coverage of `ranked`
pub fn insights(ranked: &[RankedResult]) -> Vec<String> {
    if ranked.is_empty() {
        return vec![NO_RESULTS_INSIGHT.to_string()];
    }

    let mut lines = Vec::new();

    let high = ranked
        .iter()
        .filter(|r| r.similarity > HIGH_SIMILARITY)
        .count();
    if high > 0 {
        lines.push(format!(
            "Found {} highly relevant records (similarity > {})",
            high, HIGH_SIMILARITY
        ));
    }

    let complete = ranked
        .iter()
        .filter(|r| !r.record.value.is_missing() && r.record.validity > 0.0)
        .count();
    if complete > 0 {
        lines.push(format!("{} of {} records are complete", complete, ranked.len()));
    }

    let mut companies: Vec<&str> = Vec::new();
    for result in ranked {
        if !companies.contains(&result.record.company.as_str()) {
            companies.push(&result.record.company);
        }
    }
    let shown = companies
        .iter()
        .take(COMPANIES_SHOWN)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if companies.len() > COMPANIES_SHOWN {
        lines.push(format!("Covers {} companies: {}, ...", companies.len(), shown));
    } else {
        lines.push(format!("Covers {} companies: {}", companies.len(), shown));
    }

    let years = ranked.iter().map(|r| r.record.year);
    if let (Some(min), Some(max)) = (years.clone().min(), years.max()) {
        if min == max {
            lines.push(format!("Year covered: {}", min));
        } else {
            lines.push(format!("Years covered: {}-{}", min, max));
        }
    }

    lines
}
