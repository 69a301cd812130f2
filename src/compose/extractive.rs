//! Deterministic summary built only from ranked evidence

use crate::entities::QueryIntent;
use crate::retrieval::RankedResult;

pub const NO_DATA_MESSAGE: &str = "Sorry, no data related to your query was found. \
Please try adjusting your query conditions or check if the data exists.";

/// Summarize `ranked`, grouping the first `top_n` results by company and
/// indicator. Only values present in the results are printed.
pub fn extractive_summary(intent: QueryIntent, ranked: &[RankedResult], top_n: usize) -> String {
    if ranked.is_empty() {
        return NO_DATA_MESSAGE.to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    parts.push(opening(intent).to_string());
    parts.push(format!(
        "I found {} relevant data {}.",
        ranked.len(),
        if ranked.len() == 1 { "record" } else { "records" }
    ));

    let shown = &ranked[..ranked.len().min(top_n.max(1))];
    for group in group_by_series(shown) {
        let values: Vec<String> = group
            .iter()
            .map(|r| format!("{}: {}", r.record.year, r.record.value))
            .collect();
        let first = &group[0].record;
        parts.push(format!(
            "{} - {} ({}): {}.",
            first.company,
            first.indicator_name,
            first.indicator_code,
            values.join(", ")
        ));
    }

    let missing = ranked.iter().filter(|r| r.record.value.is_missing()).count();
    if missing > 0 {
        parts.push(format!(
            "Note: {} of {} records have no reported value.",
            missing,
            ranked.len()
        ));
    }

    if ranked[0].field_match < 1.0 {
        parts.push(
            "No record matches every requested field; these are the closest records available."
                .to_string(),
        );
    }

    parts.join(" ")
}

fn opening(intent: QueryIntent) -> &'static str {
    match intent {
        QueryIntent::Trend => "Based on trend analysis,",
        QueryIntent::Comparison => "Through comparative analysis,",
        QueryIntent::Specific => "Specific data shows,",
        QueryIntent::Overview => "In overview,",
        QueryIntent::Analysis => "Based on the available data,",
        QueryIntent::General => "Based on query results,",
    }
}

/// (company, indicator) groups in order of first appearance, each sorted by
/// ascending year
fn group_by_series(ranked: &[RankedResult]) -> Vec<Vec<&RankedResult>> {
    let mut groups: Vec<Vec<&RankedResult>> = Vec::new();
    for result in ranked {
        let key = (&result.record.company, &result.record.indicator_code);
        match groups
            .iter_mut()
            .find(|g| (&g[0].record.company, &g[0].record.indicator_code) == key)
        {
            Some(group) => group.push(result),
            None => groups.push(vec![result]),
        }
    }
    for group in &mut groups {
        group.sort_by_key(|r| r.record.year);
    }
    groups
}

/// Count of results with and without a reported value
pub fn value_counts(ranked: &[RankedResult]) -> (usize, usize) {
    let missing = ranked.iter().filter(|r| r.record.value.is_missing()).count();
    (ranked.len() - missing, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObservationRow;
    use serde_json::json;

    fn ranked(company: &str, year: i32, code: &str, value: serde_json::Value, field_match: f32) -> RankedResult {
        let record = ObservationRow {
            company: company.to_string(),
            ticker: "X US Equity".to_string(),
            year,
            indicator_code: code.to_string(),
            indicator_name: format!("Indicator {}", code),
            category: "social".to_string(),
            value,
            validity: None,
            incomplete: None,
            source_file: None,
        }
        .into_record()
        .unwrap();
        RankedResult {
            validity: record.validity,
            record,
            similarity: 0.5,
            similarity_norm: 1.0,
            field_match,
            category_alignment: 1.0,
            composite: 0.9,
        }
    }

    #[test]
    fn test_no_evidence_has_no_numbers() {
        let text = extractive_summary(QueryIntent::Specific, &[], 10);
        assert_eq!(text, NO_DATA_MESSAGE);
        assert!(!text.chars().any(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_single_record() {
        let results = vec![ranked("Agilent Technologies Inc", 2015, "ES03", json!(31.4), 1.0)];
        let text = extractive_summary(QueryIntent::Specific, &results, 10);
        assert_eq!(
            text,
            "Specific data shows, I found 1 relevant data record. \
             Agilent Technologies Inc - Indicator ES03 (ES03): 2015: 31.4."
        );
    }

    #[test]
    fn test_groups_sorted_by_year() {
        let results = vec![
            ranked("Alcoa Corp", 2017, "ES01", json!(3.0), 1.0),
            ranked("Agilent Technologies Inc", 2015, "ES03", json!(31.4), 0.5),
            ranked("Alcoa Corp", 2015, "ES01", json!(null), 1.0),
        ];
        let text = extractive_summary(QueryIntent::Trend, &results, 10);
        assert!(text.starts_with("Based on trend analysis,"));
        assert!(text.contains("Alcoa Corp - Indicator ES01 (ES01): 2015: missing, 2017: 3."));
        assert!(text.contains("Note: 1 of 3 records have no reported value."));
        assert!(!text.contains("closest records"));

        let alcoa = text.find("Alcoa Corp").unwrap();
        let agilent = text.find("Agilent").unwrap();
        assert!(alcoa < agilent);
    }

    #[test]
    fn test_partial_match_caveat() {
        let results = vec![ranked("Alcoa Corp", 2016, "ES01", json!(2.0), 0.6)];
        let text = extractive_summary(QueryIntent::General, &results, 10);
        assert!(text.contains("closest records available"));
    }

    #[test]
    fn test_value_counts() {
        let results = vec![
            ranked("Alcoa Corp", 2016, "ES01", json!(2.0), 1.0),
            ranked("Alcoa Corp", 2017, "ES01", json!(null), 1.0),
        ];
        assert_eq!(value_counts(&results), (1, 1));
    }
}
