use crate::config::Config;
use crate::error::{MemoragError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_extraction(config, &mut errors);
        Self::validate_memory(config, &mut errors);
        Self::validate_response(config, &mut errors);
        Self::validate_llm(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MemoragError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
        if config.storage.database_file.is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }
        if config.storage.memory_file.is_empty() {
            errors.push(ValidationError::new(
                "storage.memory_file",
                "Memory file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if provider != "fastembed" && provider != "hash" {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be 'fastembed' or 'hash', got '{}'", provider),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let checks = [
            ("indexing.hnsw_m", config.indexing.hnsw_m),
            (
                "indexing.hnsw_ef_construction",
                config.indexing.hnsw_ef_construction,
            ),
            ("indexing.hnsw_ef_search", config.indexing.hnsw_ef_search),
            ("indexing.max_elements", config.indexing.max_elements),
        ];
        for (path, value) in checks {
            if value == 0 {
                errors.push(ValidationError::new(path, "Must be greater than 0"));
            }
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }
        if config.retrieval.prefilter_min_fields > 3 {
            errors.push(ValidationError::new(
                "retrieval.prefilter_min_fields",
                format!(
                    "Only 3 prefilter fields exist, got {}",
                    config.retrieval.prefilter_min_fields
                ),
            ));
        }
        Self::check_unit_range(
            "retrieval.prefilter_min_validity",
            config.retrieval.prefilter_min_validity,
            errors,
        );
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let weights = [
            ("rerank.similarity_weight", config.rerank.similarity_weight),
            ("rerank.field_match_weight", config.rerank.field_match_weight),
            ("rerank.validity_weight", config.rerank.validity_weight),
            ("rerank.category_weight", config.rerank.category_weight),
        ];

        for (path, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }

        let total: f32 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            errors.push(ValidationError::new(
                "rerank",
                "At least one rerank weight must be positive",
            ));
        }
    }

    fn validate_extraction(config: &Config, errors: &mut Vec<ValidationError>) {
        let extraction = &config.extraction;
        Self::check_unit_range(
            "extraction.match_threshold",
            extraction.match_threshold,
            errors,
        );
        Self::check_unit_range(
            "extraction.ambiguity_margin",
            extraction.ambiguity_margin,
            errors,
        );
        Self::check_unit_range(
            "extraction.head_token_confidence",
            extraction.head_token_confidence,
            errors,
        );

        if extraction.min_year > extraction.max_year {
            errors.push(ValidationError::new(
                "extraction.min_year",
                format!(
                    "min_year {} is after max_year {}",
                    extraction.min_year, extraction.max_year
                ),
            ));
        }
    }

    fn validate_memory(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.memory.max_turns_per_session == 0 {
            errors.push(ValidationError::new(
                "memory.max_turns_per_session",
                "Must keep at least one turn per session",
            ));
        }
        if config.memory.recent_window_days < 0 {
            errors.push(ValidationError::new(
                "memory.recent_window_days",
                "Recent window cannot be negative",
            ));
        }
    }

    fn validate_response(config: &Config, errors: &mut Vec<ValidationError>) {
        let mode = &config.response.mode;
        if mode != "generated" && mode != "extractive" {
            errors.push(ValidationError::new(
                "response.mode",
                format!("Mode must be 'generated' or 'extractive', got '{}'", mode),
            ));
        }
        if config.response.evidence_top_n == 0 {
            errors.push(ValidationError::new(
                "response.evidence_top_n",
                "Evidence count must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        // Only an enabled generator needs its key up front
        if config.llm.enabled {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is empty", env_var),
                )),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                )),
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        let provider = &config.llm.provider;
        let valid_providers = ["deepseek", "openai", "groq", "ollama"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn check_unit_range(path: &str, value: f32, errors: &mut Vec<ValidationError>) {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::new(
                path,
                format!("Must be between 0.0 and 1.0, got {}", value),
            ));
        }
    }
}
