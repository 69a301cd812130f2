//! Configuration management
//!
//! Loads the engine configuration from TOML, applies named profiles and
//! `MEMORAG_SECTION__KEY` environment overrides, then validates the result.

use crate::error::{MemoragError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub extraction: ExtractionConfig,
    pub memory: MemoryConfig,
    pub response: ResponseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Observation store, relative to `data_dir`
    pub database_file: String,
    /// Session memory snapshot, relative to `data_dir`
    pub memory_file: String,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" or "hash"
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

/// HNSW index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub max_elements: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum number of known {issuer, year, indicator} fields before the
    /// structural prefilter is used
    pub prefilter_min_fields: usize,
    pub prefilter_min_validity: f32,
}

/// Reranker weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub similarity_weight: f32,
    pub field_match_weight: f32,
    pub validity_weight: f32,
    pub category_weight: f32,
}

/// Entity extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Lexicon file; the built-in lexicon is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexicon_file: Option<PathBuf>,
    pub match_threshold: f32,
    pub ambiguity_margin: f32,
    pub head_token_confidence: f32,
    pub min_year: i32,
    pub max_year: i32,
}

/// Context and memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_turns_per_session: usize,
    pub report_top_n: usize,
    pub recent_window_days: i64,
}

/// Response composition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// "generated" or "extractive"
    pub mode: String,
    pub evidence_top_n: usize,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MemoragError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MemoragError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MemoragError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| MemoragError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(mode) = overrides.response_mode {
            self.response.mode = mode;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MEMORAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("MEMORAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__ENABLED" => self.llm.enabled = parse_env(path, value)?,
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = value.to_string(),
            "LLM__TIMEOUT_SECS" => self.llm.timeout_secs = parse_env(path, value)?,
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "RESPONSE__MODE" => self.response.mode = value.to_string(),
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Absolute path of the observation database
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(expand_path(&self.storage.data_dir)?.join(&self.storage.database_file))
    }

    /// Absolute path of the memory snapshot
    pub fn memory_path(&self) -> Result<PathBuf> {
        Ok(expand_path(&self.storage.data_dir)?.join(&self.storage.memory_file))
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            MemoragError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("esg-memorag").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| MemoragError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| MemoragError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| MemoragError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.esg-memorag"),
                database_file: "observations.db".to_string(),
                memory_file: "memory.json".to_string(),
            },
            embedding: EmbeddingConfig {
                provider: "fastembed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
            },
            indexing: IndexingConfig {
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 64,
                max_elements: 100_000,
            },
            retrieval: RetrievalConfig {
                top_k: 20,
                prefilter_min_fields: 2,
                prefilter_min_validity: 0.0,
            },
            rerank: RerankConfig {
                similarity_weight: 0.4,
                field_match_weight: 0.3,
                validity_weight: 0.2,
                category_weight: 0.1,
            },
            extraction: ExtractionConfig {
                lexicon_file: None,
                match_threshold: 0.6,
                ambiguity_margin: 0.1,
                head_token_confidence: 0.6,
                min_year: 1900,
                max_year: 2030,
            },
            memory: MemoryConfig {
                max_turns_per_session: 1000,
                report_top_n: 5,
                recent_window_days: 7,
            },
            response: ResponseConfig {
                mode: "extractive".to_string(),
                evidence_top_n: 10,
            },
            llm: LlmConfig {
                enabled: false,
                provider: "deepseek".to_string(),
                base_url: "https://api.deepseek.com/v1".to_string(),
                api_key_env: "DEEPSEEK_API_KEY".to_string(),
                model: "deepseek-chat".to_string(),
                temperature: 0.7,
                max_tokens: 1000,
                timeout_secs: 60,
                max_retries: 3,
                retry_delay_ms: 2000,
            },
            profiles: HashMap::new(),
        }
    }
}
