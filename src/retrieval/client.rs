//! Entity-driven retrieval: query composition, structural prefilter,
//! similarity search

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::entities::{Catalog, EntitySet};
use crate::error::{MemoragError, Result};
use crate::retrieval::deduplicate_candidates;
use crate::retrieval::store::VectorStore;
use crate::storage::{ObservationRecord, RecordFilter};
use serde::Serialize;
use std::sync::Arc;

/// Record returned by the vector store with its raw similarity
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub record: ObservationRecord,
    pub similarity: f32,
}

/// What one search did and found
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub query_text: String,
    pub prefilter_applied: bool,
    /// Set when the query could not be embedded and candidates were chosen
    /// by metadata alone, all with similarity 0
    pub structural_only: bool,
    pub candidates: Vec<Candidate>,
}

pub struct RetrievalClient {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    catalog: Catalog,
    config: RetrievalConfig,
}

impl RetrievalClient {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        catalog: Catalog,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            catalog,
            config,
        }
    }

    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    /// Search for up to `top_k` candidate records matching `entities`.
    ///
    /// An empty candidate list is a valid outcome.
    pub fn search(&self, entities: &EntitySet, top_k: usize) -> Result<RetrievalOutcome> {
        if top_k == 0 {
            return Err(MemoragError::InvalidQuery("top_k must be positive".to_string()));
        }

        let query_text = self.query_text(entities);
        let filter = self.prefilter(entities);

        let (hits, structural_only) = match self.embedder.embed(&query_text) {
            Ok(query_vector) => (
                self.store
                    .similarity_search(&query_vector, filter.as_ref(), top_k)?,
                false,
            ),
            Err(e) => {
                tracing::warn!(
                    "Embedding unavailable, retrieving by metadata only: {}",
                    e
                );
                let structural = self.structural_filter(entities);
                let ids = self.store.structural_search(&structural, top_k)?;
                (ids.into_iter().map(|id| (id, 0.0)).collect(), true)
            }
        };

        let mut candidates = Vec::with_capacity(hits.len());
        for (id, similarity) in hits {
            let record = self.store.get_record(&id)?;
            candidates.push(Candidate { record, similarity });
        }
        let candidates = deduplicate_candidates(candidates);

        tracing::debug!(
            "Retrieved {} candidates for '{}' (prefilter: {}, structural only: {})",
            candidates.len(),
            query_text,
            filter.is_some(),
            structural_only
        );

        Ok(RetrievalOutcome {
            query_text,
            prefilter_applied: filter.is_some(),
            structural_only,
            candidates,
        })
    }

    /// Text embedded for the search, built from the known entity values
    pub fn query_text(&self, entities: &EntitySet) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(company) = entities.company.known() {
            parts.push(company.clone());
        }
        if let Some(ticker) = entities.ticker.known() {
            parts.push(format!("({})", ticker));
        }
        if let Some(year) = entities.year.known() {
            parts.push(format!("in {}", year));
        }
        if let Some(code) = entities.indicator_code.known() {
            match self.catalog.indicator(code) {
                Some(indicator) => parts.push(format!("{} (code={})", indicator.name, code)),
                None => parts.push(format!("(code={})", code)),
            }
        } else if let Some(category) = entities.category.known() {
            parts.push(format!("{} ESG indicators", category));
        }

        if parts.is_empty() {
            "ESG".to_string()
        } else {
            parts.join(" ")
        }
    }

    /// Structural filter, applied once enough of issuer, year and indicator
    /// are known
    pub fn prefilter(&self, entities: &EntitySet) -> Option<RecordFilter> {
        let known = [
            entities.has_issuer(),
            entities.year.is_known(),
            entities.indicator_code.is_known(),
        ]
        .iter()
        .filter(|k| **k)
        .count();

        if known < self.config.prefilter_min_fields {
            return None;
        }

        Some(self.structural_filter(entities))
    }

    /// Filter on every known issuer, year and indicator field
    fn structural_filter(&self, entities: &EntitySet) -> RecordFilter {
        RecordFilter {
            company: entities.company.known().cloned(),
            ticker: entities.ticker.known().cloned(),
            year: entities.year.known().copied(),
            indicator_code: entities.indicator_code.known().cloned(),
            min_validity: self.config.prefilter_min_validity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::{EmbeddingError, HashEmbedder};
    use crate::entities::{Category, Field, IndicatorEntry};
    use crate::retrieval::ObservationStore;
    use crate::storage::{Database, ObservationRow};
    use serde_json::json;
    use tempfile::TempDir;

    fn row(ticker: &str, company: &str, year: i32, value: serde_json::Value) -> ObservationRecord {
        ObservationRow {
            company: company.to_string(),
            ticker: ticker.to_string(),
            year,
            indicator_code: "ES03".to_string(),
            indicator_name: "Pct Women in Workforce".to_string(),
            category: "social".to_string(),
            value,
            validity: None,
            incomplete: None,
            source_file: None,
        }
        .into_record()
        .unwrap()
    }

    struct UnavailableEmbedder;

    impl EmbeddingProvider for UnavailableEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::GenerationError("service down".to_string()))
        }

        fn dimension(&self) -> usize {
            128
        }

        fn model_name(&self) -> &str {
            "unavailable"
        }
    }

    fn client(temp: &TempDir) -> RetrievalClient {
        let config = Config::default();
        let db = Arc::new(Database::new(&temp.path().join("obs.db")).unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(128));
        let store = ObservationStore::open(db.clone(), 128, &config.indexing).unwrap();
        store
            .import(
                vec![
                    row("A US Equity", "Agilent Technologies Inc", 2015, json!(31.4)),
                    row("A US Equity", "Agilent Technologies Inc", 2016, json!(32.0)),
                    row("AA US Equity", "Alcoa Corp", 2015, json!(14.0)),
                ],
                embedder.as_ref(),
                16,
            )
            .unwrap();
        let catalog = db.catalog().unwrap();
        RetrievalClient::new(Arc::new(store), embedder, catalog, config.retrieval)
    }

    fn agilent(year: Option<i32>) -> EntitySet {
        EntitySet {
            company: Field::Known("Agilent Technologies Inc".to_string()),
            ticker: Field::Known("A US Equity".to_string()),
            year: year.into(),
            indicator_code: Field::Known("ES03".to_string()),
            category: Field::Known(Category::Social),
        }
    }

    #[test]
    fn test_query_text() {
        let temp = TempDir::new().unwrap();
        let client = client(&temp);
        assert_eq!(client.query_text(&EntitySet::unknown()), "ESG");
        assert_eq!(
            client.query_text(&agilent(Some(2015))),
            "Agilent Technologies Inc (A US Equity) in 2015 Pct Women in Workforce (code=ES03)"
        );
    }

    #[test]
    fn test_prefilter_threshold() {
        let temp = TempDir::new().unwrap();
        let client = client(&temp);
        assert!(client.prefilter(&EntitySet::unknown()).is_none());

        let year_only = EntitySet {
            year: Field::Known(2015),
            ..Default::default()
        };
        assert!(client.prefilter(&year_only).is_none());

        let filter = client.prefilter(&agilent(Some(2015))).unwrap();
        assert_eq!(filter.year, Some(2015));
        assert_eq!(filter.indicator_code.as_deref(), Some("ES03"));
    }

    #[test]
    fn test_search_prefiltered() {
        let temp = TempDir::new().unwrap();
        let client = client(&temp);
        let outcome = client.search(&agilent(Some(2015)), 10).unwrap();
        assert!(outcome.prefilter_applied);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].record.id, "A US Equity_2015_ES03");
    }

    #[test]
    fn test_search_empty_is_valid() {
        let temp = TempDir::new().unwrap();
        let client = client(&temp);
        let outcome = client.search(&agilent(Some(2019)), 10).unwrap();
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn test_search_unfiltered() {
        let temp = TempDir::new().unwrap();
        let client = client(&temp);
        let outcome = client.search(&EntitySet::unknown(), 2).unwrap();
        assert!(!outcome.prefilter_applied);
        assert!(outcome.candidates.len() <= 2);
        assert!(client.search(&EntitySet::unknown(), 0).is_err());
    }

    #[test]
    fn test_embedding_failure_falls_back_to_metadata() {
        let temp = TempDir::new().unwrap();
        let working = client(&temp);
        let client = RetrievalClient::new(
            working.store.clone(),
            Arc::new(UnavailableEmbedder),
            working.catalog.clone(),
            Config::default().retrieval,
        );

        let outcome = client.search(&agilent(Some(2015)), 10).unwrap();
        assert!(outcome.structural_only);
        assert!(outcome.prefilter_applied);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].record.id, "A US Equity_2015_ES03");
        assert_eq!(outcome.candidates[0].similarity, 0.0);

        // Below the prefilter threshold the known fields still narrow the scan
        let company_only = EntitySet {
            company: Field::Known("Alcoa Corp".to_string()),
            ..Default::default()
        };
        let outcome = client.search(&company_only, 10).unwrap();
        assert!(!outcome.prefilter_applied);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].record.company, "Alcoa Corp");

        let bounded = client.search(&EntitySet::unknown(), 2).unwrap();
        assert_eq!(bounded.candidates.len(), 2);
    }

    #[test]
    fn test_catalog_lookup_used() {
        let temp = TempDir::new().unwrap();
        let mut client = client(&temp);
        client.set_catalog(Catalog::new(
            vec![],
            vec![IndicatorEntry {
                code: "ES03".to_string(),
                name: "Share of women".to_string(),
                category: Category::Social,
            }],
        ));
        let set = EntitySet {
            indicator_code: Field::Known("ES03".to_string()),
            ..Default::default()
        };
        assert_eq!(client.query_text(&set), "Share of women (code=ES03)");
    }
}
