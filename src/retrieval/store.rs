//! Vector store over the observation database

use crate::config::IndexingConfig;
use crate::embedding::{cosine_similarity, EmbeddingProvider, VectorIndex};
use crate::error::{MemoragError, Result};
use crate::storage::{Database, ObservationRecord, RecordFilter, RecordId};
use serde::Serialize;
use std::sync::Arc;

/// Similarity search over stored records
pub trait VectorStore: Send + Sync {
    /// Records most similar to `query`, best first.
    ///
    /// With a filter, only records passing it are scored.
    fn similarity_search(
        &self,
        query: &[f32],
        filter: Option<&RecordFilter>,
        top_k: usize,
    ) -> Result<Vec<(RecordId, f32)>>;

    /// Up to `limit` records passing `filter` without similarity scoring,
    /// for when no query vector is available
    fn structural_search(&self, filter: &RecordFilter, limit: usize) -> Result<Vec<RecordId>>;

    fn get_record(&self, id: &str) -> Result<ObservationRecord>;
}

/// Outcome of an import run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// SQLite-backed store with an in-memory HNSW index
///
/// The index holds every stored embedding keyed by row id and is rebuilt
/// when the store opens. Filtered searches bypass it and score the
/// filtered rows exactly.
pub struct ObservationStore {
    database: Arc<Database>,
    index: VectorIndex,
    ef_search: usize,
}

impl ObservationStore {
    pub fn open(database: Arc<Database>, dimension: usize, indexing: &IndexingConfig) -> Result<Self> {
        let index = VectorIndex::new(
            dimension,
            indexing.max_elements,
            indexing.hnsw_m,
            indexing.hnsw_ef_construction,
        );

        let stored = database.all_embeddings()?;
        for embedding in &stored {
            if embedding.vector.len() != dimension {
                return Err(MemoragError::InvalidConfigValue {
                    path: "embedding.dimension".to_string(),
                    message: format!(
                        "stored vectors have dimension {} but the provider produces {}; re-import with the configured model",
                        embedding.vector.len(),
                        dimension
                    ),
                });
            }
            index.insert(embedding.row_id as u64, &embedding.vector)?;
        }
        tracing::info!("Vector index rebuilt with {} records", index.len());

        Ok(Self {
            database,
            index,
            ef_search: indexing.hnsw_ef_search,
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Embed and store records that are not stored yet.
    ///
    /// Each record is embedded at most once: ids already present are skipped
    /// before any embedding work happens.
    pub fn import(
        &self,
        records: Vec<ObservationRecord>,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut pending = Vec::new();
        for record in records {
            if self.database.contains(&record.id)? || pending.iter().any(|r: &ObservationRecord| r.id == record.id) {
                summary.skipped += 1;
            } else {
                pending.push(record);
            }
        }

        for chunk in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(|r| r.embedding_text()).collect();
            let vectors = provider.embed_batch(&texts)?;

            for (record, vector) in chunk.iter().zip(vectors.iter()) {
                match self
                    .database
                    .insert_observation(record, vector, provider.model_name())?
                {
                    Some(row_id) => {
                        self.index.insert(row_id as u64, vector)?;
                        summary.inserted += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        tracing::info!(
            "Imported {} records ({} already present)",
            summary.inserted,
            summary.skipped
        );
        Ok(summary)
    }

    fn exact_search(
        &self,
        query: &[f32],
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<(RecordId, f32)>> {
        let mut scored: Vec<(RecordId, f32)> = self
            .database
            .filtered_embeddings(filter)?
            .into_iter()
            .map(|e| {
                let score = cosine_similarity(query, &e.vector);
                (e.record_id, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn approximate_search(&self, query: &[f32], top_k: usize) -> Result<Vec<(RecordId, f32)>> {
        let neighbours = self.index.search(query, top_k, self.ef_search)?;

        let mut results = Vec::with_capacity(neighbours.len());
        for neighbour in neighbours {
            match self.database.record_id_for_row(neighbour.id as i64)? {
                Some(id) => results.push((id, neighbour.score)),
                None => tracing::warn!("Index row {} has no stored record", neighbour.id),
            }
        }
        Ok(results)
    }
}

impl VectorStore for ObservationStore {
    fn similarity_search(
        &self,
        query: &[f32],
        filter: Option<&RecordFilter>,
        top_k: usize,
    ) -> Result<Vec<(RecordId, f32)>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        match filter {
            Some(filter) => self.exact_search(query, filter, top_k),
            None => self.approximate_search(query, top_k),
        }
    }

    fn structural_search(&self, filter: &RecordFilter, limit: usize) -> Result<Vec<RecordId>> {
        self.database.filtered_ids(filter, limit)
    }

    fn get_record(&self, id: &str) -> Result<ObservationRecord> {
        self.database
            .get_record(id)?
            .ok_or_else(|| MemoragError::RecordNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::HashEmbedder;
    use crate::storage::ObservationRow;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(company: &str, ticker: &str, year: i32, code: &str, name: &str, value: serde_json::Value) -> ObservationRecord {
        ObservationRow {
            company: company.to_string(),
            ticker: ticker.to_string(),
            year,
            indicator_code: code.to_string(),
            indicator_name: name.to_string(),
            category: "social".to_string(),
            value,
            validity: None,
            incomplete: None,
            source_file: None,
        }
        .into_record()
        .unwrap()
    }

    fn open_store(temp: &TempDir) -> ObservationStore {
        let db = Arc::new(Database::new(&temp.path().join("obs.db")).unwrap());
        ObservationStore::open(db, 64, &Config::default().indexing).unwrap()
    }

    #[test]
    fn test_import_skips_existing() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let embedder = HashEmbedder::new(64);

        let records = vec![
            record("Agilent Technologies Inc", "A US Equity", 2015, "ES03", "Pct Women in Workforce", json!(31.4)),
            record("Agilent Technologies Inc", "A US Equity", 2016, "ES03", "Pct Women in Workforce", json!(32.0)),
        ];

        let first = store.import(records.clone(), &embedder, 8).unwrap();
        assert_eq!(first, ImportSummary { inserted: 2, skipped: 0 });

        let second = store.import(records, &embedder, 8).unwrap();
        assert_eq!(second, ImportSummary { inserted: 0, skipped: 2 });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_filtered_search_honors_filter() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let embedder = HashEmbedder::new(64);
        store
            .import(
                vec![
                    record("Agilent Technologies Inc", "A US Equity", 2015, "ES03", "Pct Women in Workforce", json!(31.4)),
                    record("Agilent Technologies Inc", "A US Equity", 2016, "ES03", "Pct Women in Workforce", json!(32.0)),
                    record("Alcoa Corp", "AA US Equity", 2015, "ES03", "Pct Women in Workforce", json!(14.0)),
                ],
                &embedder,
                8,
            )
            .unwrap();

        let query = embedder.embed("Agilent women workforce 2015").unwrap();
        let filter = RecordFilter {
            year: Some(2015),
            ..Default::default()
        };
        let results = store.similarity_search(&query, Some(&filter), 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(id, _)| id.contains("_2015_")));
        assert_eq!(results[0].0, "A US Equity_2015_ES03");
    }

    #[test]
    fn test_structural_search_needs_no_vector() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let embedder = HashEmbedder::new(64);
        store
            .import(
                vec![
                    record("Agilent Technologies Inc", "A US Equity", 2015, "ES03", "Pct Women in Workforce", json!(31.4)),
                    record("Agilent Technologies Inc", "A US Equity", 2016, "ES03", "Pct Women in Workforce", json!(null)),
                    record("Alcoa Corp", "AA US Equity", 2015, "ES03", "Pct Women in Workforce", json!(14.0)),
                ],
                &embedder,
                8,
            )
            .unwrap();

        let filter = RecordFilter {
            company: Some("agilent technologies inc".to_string()),
            ..Default::default()
        };
        let ids = store.structural_search(&filter, 10).unwrap();
        // Higher validity first
        assert_eq!(ids, vec!["A US Equity_2015_ES03", "A US Equity_2016_ES03"]);

        let ids = store.structural_search(&RecordFilter::default(), 1).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_unfiltered_search_and_reopen() {
        let temp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(64);
        {
            let store = open_store(&temp);
            store
                .import(
                    vec![record("Alcoa Corp", "AA US Equity", 2017, "ES03", "Pct Women in Workforce", json!(15.0))],
                    &embedder,
                    8,
                )
                .unwrap();
        }

        let store = open_store(&temp);
        assert_eq!(store.len(), 1);
        let query = embedder.embed("Alcoa women 2017").unwrap();
        let results = store.similarity_search(&query, None, 5).unwrap();
        assert_eq!(results[0].0, "AA US Equity_2017_ES03");

        let fetched = store.get_record("AA US Equity_2017_ES03").unwrap();
        assert_eq!(fetched.year, 2017);
        assert!(matches!(
            store.get_record("nope"),
            Err(MemoragError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch_on_open() {
        let temp = TempDir::new().unwrap();
        {
            let store = open_store(&temp);
            store
                .import(
                    vec![record("Alcoa Corp", "AA US Equity", 2017, "ES03", "Pct Women in Workforce", json!(15.0))],
                    &HashEmbedder::new(64),
                    8,
                )
                .unwrap();
        }
        let db = Arc::new(Database::new(&temp.path().join("obs.db")).unwrap());
        assert!(ObservationStore::open(db, 32, &Config::default().indexing).is_err());
    }
}
