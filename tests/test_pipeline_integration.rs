//! End-to-end query pipeline over a small ESG sample
//!
//! Uses the hash embedder so no model download is needed.

use esg_memorag::compose::{GenerationError, PromptPayload, ResponseMode, TextGenerator, NO_DATA_MESSAGE};
use esg_memorag::config::Config;
use esg_memorag::embedding::{EmbeddingError, EmbeddingProvider, HashEmbedder};
use esg_memorag::entities::Field;
use esg_memorag::memory::MemoryManager;
use esg_memorag::pipeline::{Engine, QueryOutcome};
use esg_memorag::retrieval::RerankWeights;
use esg_memorag::session::SessionState;
use esg_memorag::storage::ObservationRow;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/esg_sample.jsonl")
}

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();
    config.embedding.provider = "hash".to_string();
    config.embedding.dimension = 256;
    config
}

fn loaded_engine(temp: &TempDir) -> Engine {
    let mut engine = Engine::from_config(test_config(temp)).unwrap();
    let summary = engine.import_file(&fixture()).unwrap();
    assert_eq!(summary.inserted, 8);
    engine
}

struct FailingGenerator;

impl TextGenerator for FailingGenerator {
    fn generate(&self, _payload: &PromptPayload) -> Result<String, GenerationError> {
        Err(GenerationError::RetriesExhausted {
            attempts: 3,
            last_error: "connection refused".to_string(),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Hash embedder that can be switched off after the import
struct SwitchableEmbedder {
    inner: HashEmbedder,
    available: Arc<AtomicBool>,
}

impl EmbeddingProvider for SwitchableEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.available.load(Ordering::SeqCst) {
            self.inner.embed(text)
        } else {
            Err(EmbeddingError::GenerationError("model unavailable".to_string()))
        }
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "switchable"
    }
}

fn default_weights() -> RerankWeights {
    RerankWeights::from(&Config::default().rerank)
}

#[test]
fn test_import_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut engine = loaded_engine(&temp);

    let again = engine.import_file(&fixture()).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.skipped, 8);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.observation_count, 8);
    assert_eq!(stats.company_count, 2);
    assert_eq!(stats.missing_value_count, 1);
}

#[test]
fn test_exact_question_top_result() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    let response = engine
        .submit_query("s1", "What was Agilent's percentage of women in the workforce in 2015?")
        .unwrap();

    match response.outcome {
        QueryOutcome::Answered {
            response,
            strategy,
            results,
            entities,
            insights,
            fallback_reason,
        } => {
            assert_eq!(strategy, ResponseMode::Extractive);
            assert!(fallback_reason.is_none());
            assert_eq!(entities.year, Field::Known(2015));
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].record.indicator_code, "ES03");
            assert_eq!(results[0].record.year, 2015);
            assert!((results[0].field_match - 1.0).abs() < 1e-6);
            assert!(
                results[0].composite >= default_weights().similarity * results[0].similarity_norm
            );
            assert!(response.contains("31.4"));
            assert!(insights.contains(&"Year covered: 2015".to_string()));
        }
        other => panic!("expected an answer, got {:?}", other),
    }
}

#[test]
fn test_single_record_store_top_result() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let memory = MemoryManager::in_memory(config.memory.clone());
    let mut engine = Engine::build(config, Arc::new(HashEmbedder::new(256)), None, memory).unwrap();
    let record = ObservationRow {
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
    .unwrap();
    assert_eq!(engine.import(vec![record]).unwrap().inserted, 1);

    let response = engine
        .submit_query("s1", "What was Agilent's percentage of women in the workforce in 2015?")
        .unwrap();
    match response.outcome {
        QueryOutcome::Answered { results, .. } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].record.id, "A US Equity_2015_ES03");
            assert!((results[0].field_match - 1.0).abs() < 1e-6);
            assert!((results[0].similarity_norm - 1.0).abs() < 1e-6);
            assert!(
                results[0].composite >= default_weights().similarity * results[0].similarity_norm
            );
        }
        other => panic!("expected an answer, got {:?}", other),
    }
}

#[test]
fn test_embedding_outage_answers_from_metadata() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let memory = MemoryManager::in_memory(config.memory.clone());
    let available = Arc::new(AtomicBool::new(true));
    let embedder = SwitchableEmbedder {
        inner: HashEmbedder::new(256),
        available: available.clone(),
    };

    let mut engine = Engine::build(config, Arc::new(embedder), None, memory).unwrap();
    assert_eq!(engine.import_file(&fixture()).unwrap().inserted, 8);
    available.store(false, Ordering::SeqCst);
    engine.set_debug(true);

    let response = engine
        .submit_query("s1", "Agilent women in workforce 2015")
        .unwrap();
    assert!(response.trace.as_ref().unwrap().structural_only);
    match response.outcome {
        QueryOutcome::Answered {
            response, results, ..
        } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].similarity, 0.0);
            assert!(response.contains("31.4"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    // Too few fields for the prefilter: the known company still bounds the scan
    let response = engine.submit_query("s2", "Alcoa environmental data").unwrap();
    match response.outcome {
        QueryOutcome::Answered { results, .. } => {
            assert!(!results.is_empty());
            assert!(results.iter().all(|r| r.record.company == "Alcoa Corp"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    // Outage answers are remembered, so follow-ups still work
    let followup = engine.submit_query("s1", "What about 2016?").unwrap();
    match followup.outcome {
        QueryOutcome::Answered { results, .. } => {
            assert_eq!(results[0].record.year, 2016);
        }
        other => panic!("expected an answer, got {:?}", other),
    }
}

#[test]
fn test_followup_inherits_entities() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    engine
        .submit_query("s1", "Agilent women in workforce 2015")
        .unwrap();
    let response = engine.submit_query("s1", "What about 2016?").unwrap();

    match response.outcome {
        QueryOutcome::Answered {
            results, entities, ..
        } => {
            assert_eq!(
                entities.company,
                Field::Known("Agilent Technologies Inc".to_string())
            );
            assert_eq!(entities.indicator_code, Field::Known("ES03".to_string()));
            assert_eq!(results[0].record.year, 2016);
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    // Other sessions start without context
    let other = engine.submit_query("s2", "What about 2016?").unwrap();
    assert!(matches!(other.outcome, QueryOutcome::Restate { .. }));
}

#[test]
fn test_ambiguous_indicator_asks_for_clarification() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    let response = engine.submit_query("s1", "Show me emissions").unwrap();
    match response.outcome {
        QueryOutcome::NeedsClarification {
            field, candidates, ..
        } => {
            assert_eq!(field, "indicator");
            assert!(candidates.len() >= 2);
        }
        other => panic!("expected a clarification, got {:?}", other),
    }
    assert_eq!(engine.show_memory_report("s1").unwrap().turn_count, 0);
}

#[test]
fn test_shared_indicator_without_company_asks_which() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    let response = engine
        .submit_query("s1", "Show me nitrogen oxide emissions")
        .unwrap();
    match response.outcome {
        QueryOutcome::NeedsClarification {
            field, candidates, ..
        } => {
            assert_eq!(field, "company");
            assert_eq!(
                candidates,
                vec!["Agilent Technologies Inc".to_string(), "Alcoa Corp".to_string()]
            );
        }
        other => panic!("expected a clarification, got {:?}", other),
    }
    assert_eq!(engine.show_memory_report("s1").unwrap().turn_count, 0);

    // Once a company is in context the same question is answerable
    engine
        .submit_query("s1", "Alcoa nitrogen oxide emissions 2015")
        .unwrap();
    let response = engine
        .submit_query("s1", "Show me nitrogen oxide emissions")
        .unwrap();
    match response.outcome {
        QueryOutcome::Answered { results, .. } => {
            assert_eq!(results[0].record.company, "Alcoa Corp");
            assert_eq!(results[0].record.indicator_code, "ES01");
        }
        other => panic!("expected an answer, got {:?}", other),
    }
}

#[test]
fn test_no_evidence_reports_no_figures() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    let response = engine
        .submit_query("s1", "Agilent women in workforce 2019")
        .unwrap();
    match &response.outcome {
        QueryOutcome::NoEvidence { response, entities } => {
            assert_eq!(response, NO_DATA_MESSAGE);
            assert!(!response.chars().any(|c| c.is_ascii_digit()));
            assert_eq!(entities.year, Field::Known(2019));
        }
        other => panic!("expected no evidence, got {:?}", other),
    }

    // The turn still counts, so a follow-up can move to a covered year
    assert_eq!(engine.show_memory_report("s1").unwrap().turn_count, 1);
    let followup = engine.submit_query("s1", "What about 2017?").unwrap();
    assert!(matches!(followup.outcome, QueryOutcome::Answered { .. }));
}

#[test]
fn test_clear_memory_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    engine
        .submit_query("s1", "Agilent women in workforce 2015")
        .unwrap();

    engine.clear_memory("s1");
    let first = engine.show_memory_report("s1").unwrap();
    engine.clear_memory("s1");
    let second = engine.show_memory_report("s1").unwrap();

    assert_eq!(first.session_state, SessionState::Empty);
    assert_eq!(first.turn_count, 0);
    assert_eq!(second.turn_count, 0);
    assert_eq!(first.distinct_patterns, second.distinct_patterns);

    let response = engine.submit_query("s1", "What about 2016?").unwrap();
    assert!(matches!(response.outcome, QueryOutcome::Restate { .. }));
}

#[test]
fn test_ranking_is_deterministic() {
    let temp = TempDir::new().unwrap();
    let engine = loaded_engine(&temp);

    let ranked = |session: &str| -> Vec<(String, f32)> {
        match engine
            .submit_query(session, "Alcoa environmental data")
            .unwrap()
            .outcome
        {
            QueryOutcome::Answered { results, .. } => results
                .into_iter()
                .map(|r| (r.record.id, r.composite))
                .collect(),
            other => panic!("expected an answer, got {:?}", other),
        }
    };

    let first = ranked("a");
    let second = ranked("b");
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_memory_survives_restart() {
    let temp = TempDir::new().unwrap();
    {
        let engine = loaded_engine(&temp);
        engine
            .submit_query("s1", "Agilent women in workforce 2015")
            .unwrap();
        engine.shutdown().unwrap();
    }

    let engine = Engine::from_config(test_config(&temp)).unwrap();
    assert_eq!(engine.stats().unwrap().observation_count, 8);

    let report = engine.show_memory_report("s1").unwrap();
    assert_eq!(report.turn_count, 1);
    assert!(report.durable);

    let response = engine.submit_query("s1", "What about 2017?").unwrap();
    match response.outcome {
        QueryOutcome::Answered { results, .. } => {
            assert_eq!(results[0].record.year, 2017);
            assert!(results[0].record.value.to_string().contains("33.1"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }
}

#[test]
fn test_generation_failure_falls_back_to_extractive() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp);
    config.response.mode = "generated".to_string();
    let memory = MemoryManager::in_memory(config.memory.clone());

    let mut engine = Engine::build(
        config,
        Arc::new(HashEmbedder::new(256)),
        Some(Box::new(FailingGenerator)),
        memory,
    )
    .unwrap();
    engine.import_file(&fixture()).unwrap();
    assert_eq!(engine.mode(), ResponseMode::Generated);

    let response = engine
        .submit_query("s1", "Agilent women in workforce 2015")
        .unwrap();
    match response.outcome {
        QueryOutcome::Answered {
            response,
            strategy,
            fallback_reason,
            ..
        } => {
            assert_eq!(strategy, ResponseMode::Extractive);
            assert!(fallback_reason.is_some());
            assert!(response.contains("31.4"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    assert_eq!(engine.toggle_mode().unwrap(), ResponseMode::Extractive);
}
