//! Query pipeline
//!
//! Entity extraction, retrieval, reranking, composition and memory wired
//! into the entry points the command surface calls.

use crate::compose::{
    insights, OpenAiCompatGenerator, ResponseComposer, ResponseMode, TextGenerator,
};
use crate::config::{expand_path, Config};
use crate::embedding::{provider_from_config, EmbeddingProvider};
use crate::entities::{EntityExtractor, EntitySet, Extraction};
use crate::error::{MemoragError, Result};
use crate::lexicon::Lexicon;
use crate::memory::{JsonFilePersistence, MemoryManager, MemoryReport};
use crate::retrieval::{
    Candidate, ImportSummary, MetadataReranker, ObservationStore, RankedResult, RerankWeights,
    RetrievalClient,
};
use crate::session::QueryTurn;
use crate::storage::{read_rows, Database, DbStats, ObservationRecord};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// What a submitted query produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered {
        response: String,
        strategy: ResponseMode,
        entities: EntitySet,
        results: Vec<RankedResult>,
        /// Relevance and coverage notes on `results`
        insights: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback_reason: Option<String>,
    },
    /// Retrieval found nothing; the response carries no figures
    NoEvidence {
        response: String,
        entities: EntitySet,
    },
    /// A name matched several catalog entries
    NeedsClarification {
        field: String,
        token: String,
        candidates: Vec<String>,
    },
    /// Follow-up phrasing with nothing to follow up on
    Restate { message: String },
}

impl QueryOutcome {
    /// Text to show the user
    pub fn message(&self) -> String {
        match self {
            QueryOutcome::Answered { response, .. } | QueryOutcome::NoEvidence { response, .. } => {
                response.clone()
            }
            QueryOutcome::NeedsClarification {
                field,
                token,
                candidates,
            } => format!(
                "'{}' matches more than one {}: {}. Please name the one you mean.",
                token,
                field,
                candidates.join(", ")
            ),
            QueryOutcome::Restate { message } => message.clone(),
        }
    }
}

/// Intermediate artifacts of one query, returned in debug mode
#[derive(Debug, Clone, Serialize)]
pub struct QueryTrace {
    pub extraction: Extraction,
    pub query_text: String,
    pub prefilter_applied: bool,
    /// Candidates were picked by metadata because embedding failed
    pub structural_only: bool,
    pub candidates: Vec<Candidate>,
    pub ranked: Vec<RankedResult>,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub outcome: QueryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<QueryTrace>,
}

pub struct Engine {
    config: Config,
    database: Arc<Database>,
    store: Arc<ObservationStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: EntityExtractor,
    retrieval: RetrievalClient,
    reranker: MetadataReranker,
    composer: ResponseComposer,
    memory: MemoryManager,
    debug: bool,
}

impl Engine {
    /// Open the store and memory named by `config`
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = provider_from_config(&config.embedding)?;

        let generator: Option<Box<dyn TextGenerator>> = if config.llm.enabled {
            match OpenAiCompatGenerator::from_config(&config.llm) {
                Ok(generator) => Some(Box::new(generator)),
                Err(e) => {
                    tracing::warn!("Text generation disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let memory = MemoryManager::open(
            config.memory.clone(),
            Box::new(JsonFilePersistence::new(config.memory_path()?)),
        )?;

        Self::build(config, embedder, generator, memory)
    }

    /// Assemble an engine from explicit collaborators
    pub fn build(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Option<Box<dyn TextGenerator>>,
        memory: MemoryManager,
    ) -> Result<Self> {
        let database = Arc::new(Database::new(&config.database_path()?)?);
        let store = Arc::new(ObservationStore::open(
            database.clone(),
            embedder.dimension(),
            &config.indexing,
        )?);
        let catalog = database.catalog()?;

        let lexicon = match &config.extraction.lexicon_file {
            Some(path) => Lexicon::from_config_file(&expand_path(path)?)?,
            None => Lexicon::builtin()?,
        };
        let extractor = EntityExtractor::new(lexicon, catalog.clone(), config.extraction.clone());
        let retrieval = RetrievalClient::new(
            store.clone(),
            embedder.clone(),
            catalog,
            config.retrieval.clone(),
        );
        let reranker = MetadataReranker::new(RerankWeights::from(&config.rerank));
        let mode: ResponseMode = config.response.mode.parse()?;
        let composer = ResponseComposer::new(mode, generator, config.response.evidence_top_n);

        tracing::info!(
            "Engine ready: {} records, embedding {}, {} responses",
            store.len(),
            embedder.model_name(),
            composer.mode()
        );

        Ok(Self {
            config,
            database,
            store,
            embedder,
            extractor,
            retrieval,
            reranker,
            composer,
            memory,
            debug: false,
        })
    }

    /// Answer `text` within `session_id`.
    ///
    /// The turn is recorded only once an answer (or a no-evidence result) is
    /// produced; clarification and restate outcomes leave memory untouched.
    pub fn submit_query(&self, session_id: &str, text: &str) -> Result<QueryResponse> {
        let prior = self.memory.resolve_carryover(session_id);

        let extraction = match self.extractor.extract(text, &prior) {
            Ok(extraction) => extraction,
            Err(MemoragError::AmbiguousEntity {
                field,
                token,
                candidates,
            }) => {
                tracing::info!("Ambiguous {} '{}' in query", field, token);
                return Ok(QueryResponse {
                    outcome: QueryOutcome::NeedsClarification {
                        field,
                        token,
                        candidates,
                    },
                    trace: None,
                });
            }
            Err(MemoragError::MalformedFollowup { text }) => {
                return Ok(QueryResponse {
                    outcome: QueryOutcome::Restate {
                        message: format!(
                            "There is no earlier question to follow up on. Please restate \"{}\" with a company or indicator.",
                            text
                        ),
                    },
                    trace: None,
                });
            }
            Err(e) => return Err(e),
        };

        let retrieved = self
            .retrieval
            .search(&extraction.resolved, self.config.retrieval.top_k)?;
        let candidates = if self.debug {
            retrieved.candidates.clone()
        } else {
            Vec::new()
        };
        let ranked = self
            .reranker
            .rerank(retrieved.candidates, &extraction.resolved);

        let session = self.memory.session(session_id);
        let payload = self
            .composer
            .compose(text, extraction.intent, &ranked, session.as_ref());
        let composed = self.composer.respond(&payload, &ranked);
        let insights = insights(&ranked);

        self.memory.record_turn(
            session_id,
            QueryTurn::new(
                text,
                extraction.resolved.clone(),
                extraction.intent,
                ranked.clone(),
                composed.text.clone(),
                composed.strategy,
            )
            .with_insights(insights.clone()),
        )?;

        let outcome = if ranked.is_empty() {
            QueryOutcome::NoEvidence {
                response: composed.text,
                entities: extraction.resolved.clone(),
            }
        } else {
            QueryOutcome::Answered {
                response: composed.text,
                strategy: composed.strategy,
                entities: extraction.resolved.clone(),
                results: ranked.clone(),
                insights,
                fallback_reason: composed.fallback_reason,
            }
        };

        let trace = self.debug.then(|| QueryTrace {
            extraction,
            query_text: retrieved.query_text,
            prefilter_applied: retrieved.prefilter_applied,
            structural_only: retrieved.structural_only,
            candidates,
            ranked,
            prompt: payload.prompt,
        });

        Ok(QueryResponse { outcome, trace })
    }

    pub fn show_memory_report(&self, session_id: &str) -> Result<MemoryReport> {
        self.memory.report(session_id)
    }

    pub fn clear_memory(&self, session_id: &str) {
        self.memory.clear(session_id);
    }

    pub fn reset_patterns(&self) -> Result<()> {
        self.memory.reset_patterns()
    }

    pub fn toggle_mode(&mut self) -> Result<ResponseMode> {
        let mode = self.composer.toggle_mode()?;
        tracing::info!("Response mode: {}", mode);
        Ok(mode)
    }

    pub fn mode(&self) -> ResponseMode {
        self.composer.mode()
    }

    pub fn toggle_debug(&mut self) -> bool {
        self.debug = !self.debug;
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Import a JSON-lines observation file
    pub fn import_file(&mut self, path: &Path) -> Result<ImportSummary> {
        let records = read_rows(path)?;
        self.import(records)
    }

    /// Store and embed new records, then refresh the name catalog
    pub fn import(&mut self, records: Vec<ObservationRecord>) -> Result<ImportSummary> {
        let summary = self.store.import(
            records,
            self.embedder.as_ref(),
            self.config.embedding.batch_size,
        )?;

        let catalog = self.database.catalog()?;
        self.extractor.set_catalog(catalog.clone());
        self.retrieval.set_catalog(catalog);

        Ok(summary)
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.database.stats()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Persist memory before exit
    pub fn shutdown(&self) -> Result<()> {
        self.memory.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::storage::ObservationRow;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = temp.path().to_path_buf();
        config.embedding.provider = "hash".to_string();
        config.embedding.dimension = 128;
        config
    }

    fn engine(temp: &TempDir) -> Engine {
        let config = test_config(temp);
        let memory = MemoryManager::in_memory(config.memory.clone());
        let mut engine = Engine::build(config, Arc::new(HashEmbedder::new(128)), None, memory).unwrap();
        engine
            .import(vec![ObservationRow {
                company: "Agilent Technologies Inc".to_string(),
                ticker: "A US Equity".to_string(),
                year: 2015,
                indicator_code: "ES03".to_string(),
                indicator_name: "Pct Women in Workforce".to_string(),
                category: "social".to_string(),
                value: json!(31.4),
                validity: None,
                incomplete: None,
                source_file: None,
            }
            .into_record()
            .unwrap()])
            .unwrap();
        engine
    }

    #[test]
    fn test_answer_records_turn() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        let response = engine
            .submit_query("s1", "Agilent women in workforce 2015")
            .unwrap();
        assert!(response.trace.is_none());
        match response.outcome {
            QueryOutcome::Answered { insights, .. } => {
                assert!(insights.contains(&"1 of 1 records are complete".to_string()));
                assert!(insights.contains(&"Year covered: 2015".to_string()));
            }
            other => panic!("expected an answer, got {:?}", other),
        }
        assert_eq!(engine.show_memory_report("s1").unwrap().turn_count, 1);

        let session = engine.memory().session("s1").unwrap();
        let turn = session.last_turn().unwrap();
        assert!(turn
            .insights
            .contains(&"Covers 1 companies: Agilent Technologies Inc".to_string()));
    }

    #[test]
    fn test_restate_leaves_no_trace() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        let response = engine.submit_query("s1", "what about 2016?").unwrap();
        assert!(matches!(response.outcome, QueryOutcome::Restate { .. }));
        assert_eq!(engine.show_memory_report("s1").unwrap().turn_count, 0);
    }

    #[test]
    fn test_debug_trace() {
        let temp = TempDir::new().unwrap();
        let mut engine = engine(&temp);
        assert!(engine.toggle_debug());

        let response = engine
            .submit_query("s1", "Agilent women in workforce 2015")
            .unwrap();
        let trace = response.trace.unwrap();
        assert!(trace.prefilter_applied);
        assert!(!trace.structural_only);
        assert_eq!(trace.candidates.len(), 1);
        assert_eq!(trace.ranked[0].record.year, 2015);
        assert!(trace.prompt.contains("31.4"));
    }

    #[test]
    fn test_toggle_mode_without_generator() {
        let temp = TempDir::new().unwrap();
        let mut engine = engine(&temp);
        assert_eq!(engine.mode(), ResponseMode::Extractive);
        assert!(engine.toggle_mode().is_err());
    }

    #[test]
    fn test_from_config_with_hash_provider() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::from_config(test_config(&temp)).unwrap();
        assert_eq!(engine.stats().unwrap().observation_count, 0);
        engine.shutdown().unwrap();
    }
}
