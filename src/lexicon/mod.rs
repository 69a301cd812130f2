//! Query lexicon for configuration-driven entity extraction
//!
//! This module provides:
//! - Pre-compiled regexes for years, indicator codes and ticker mentions
//! - Term lists for ESG categories and query intents
//! - Token normalization (stopwords, legal suffixes, synonyms) shared by the
//!   fuzzy catalog matcher
//!
//! The built-in lexicon lives in `config-templates/lexicon.toml`.

use crate::entities::{Category, Field, QueryIntent};
use crate::error::{MemoragError, Result};
use ahash::{AHashMap, AHashSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

const BUILTIN_LEXICON: &str = include_str!("../../config-templates/lexicon.toml");

/// Synonym group: every variant is read as the canonical token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymConfig {
    pub canonical: String,
    pub variants: Vec<String>,
}

/// Category term list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTermsConfig {
    pub name: String,
    pub terms: Vec<String>,
}

/// Intent term list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentTermsConfig {
    pub name: String,
    pub terms: Vec<String>,
}

/// Lexicon file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconConfig {
    pub year_pattern: String,
    pub indicator_code_pattern: String,
    pub ticker_pattern: String,
    #[serde(default)]
    pub followup_markers: Vec<String>,
    #[serde(default)]
    pub legal_suffixes: Vec<String>,
    #[serde(default)]
    pub stopwords: Vec<String>,
    #[serde(default)]
    pub synonym: Vec<SynonymConfig>,
    #[serde(default)]
    pub category: Vec<CategoryTermsConfig>,
    #[serde(default)]
    pub intent: Vec<IntentTermsConfig>,
}

/// Compiled lexicon
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub year: Regex,
    pub indicator_code: Regex,
    pub ticker: Regex,
    followup_markers: Vec<String>,
    legal_suffixes: AHashSet<String>,
    stopwords: AHashSet<String>,
    /// variant -> canonical
    synonyms: AHashMap<String, String>,
    categories: Vec<(Category, AHashSet<String>)>,
    intents: Vec<(QueryIntent, Vec<String>)>,
}

impl Lexicon {
    /// Lexicon compiled from the bundled template
    pub fn builtin() -> Result<Self> {
        let config: LexiconConfig = toml::from_str(BUILTIN_LEXICON)?;
        Self::from_config(config)
    }

    /// Raw text of the bundled template, for `config init`
    pub fn template() -> &'static str {
        BUILTIN_LEXICON
    }

    /// Load and compile a lexicon file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MemoragError::Io {
            source: e,
            context: format!("Failed to read lexicon file: {:?}", path),
        })?;
        let config: LexiconConfig = toml::from_str(&content)?;
        Self::from_config(config)
    }

    /// Compile a parsed lexicon
    pub fn from_config(config: LexiconConfig) -> Result<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                MemoragError::Config(format!("Invalid regex for {}: {}", name, e))
            })
        };

        let year = compile("year_pattern", &config.year_pattern)?;
        let indicator_code = compile("indicator_code_pattern", &config.indicator_code_pattern)?;
        let ticker = compile("ticker_pattern", &config.ticker_pattern)?;

        let mut synonyms = AHashMap::new();
        for group in &config.synonym {
            let canonical = group.canonical.to_lowercase();
            for variant in &group.variants {
                synonyms.insert(variant.to_lowercase(), canonical.clone());
            }
        }

        let mut categories = Vec::with_capacity(config.category.len());
        for entry in &config.category {
            let category: Category = entry.name.parse()?;
            let terms = entry
                .terms
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    synonyms.get(&t).cloned().unwrap_or(t)
                })
                .collect();
            categories.push((category, terms));
        }

        let mut intents = Vec::with_capacity(config.intent.len());
        for entry in &config.intent {
            let intent: QueryIntent = entry.name.parse()?;
            let terms = entry.terms.iter().map(|t| t.to_lowercase()).collect();
            intents.push((intent, terms));
        }

        Ok(Self {
            year,
            indicator_code,
            ticker,
            followup_markers: config
                .followup_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            legal_suffixes: config
                .legal_suffixes
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            stopwords: config.stopwords.iter().map(|s| s.to_lowercase()).collect(),
            synonyms,
            categories,
            intents,
        })
    }

    /// Collapse whitespace and fold full-width punctuation to ASCII
    pub fn clean(text: &str) -> String {
        let folded: String = text
            .chars()
            .map(|c| match c {
                '，' => ',',
                '。' => '.',
                '？' => '?',
                '！' => '!',
                '：' => ':',
                '；' => ';',
                '（' => '(',
                '）' => ')',
                '％' => '%',
                '\u{3000}' => ' ',
                other => other,
            })
            .collect();
        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Lower-case word tokens with `%` kept as its own token
    pub fn raw_tokens(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                current.extend(c.to_lowercase());
            } else {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                if c == '%' {
                    tokens.push("%".to_string());
                }
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }

    /// Tokens with synonyms folded to their canonical form
    pub fn tokens(&self, text: &str) -> Vec<String> {
        Self::raw_tokens(text)
            .into_iter()
            .map(|t| self.canonical(t))
            .collect()
    }

    fn canonical(&self, token: String) -> String {
        match self.synonyms.get(&token) {
            Some(canonical) => canonical.clone(),
            None => token,
        }
    }

    /// Significant tokens of a catalog name: canonical, without stopwords,
    /// and without legal suffixes when `issuer` is set
    pub fn significant_tokens(&self, name: &str, issuer: bool) -> Vec<String> {
        self.tokens(name)
            .into_iter()
            .filter(|t| !self.stopwords.contains(t))
            .filter(|t| !(issuer && self.legal_suffixes.contains(t)))
            .collect()
    }

    /// Whether the text opens (or contains) a follow-up phrase
    pub fn is_followup(&self, text: &str) -> bool {
        let phrase = Self::phrase(text);
        self.followup_markers
            .iter()
            .any(|m| phrase.contains(&format!(" {} ", m)))
    }

    /// Category with the most term hits; ties stay unknown
    pub fn detect_category(&self, tokens: &[String]) -> Field<Category> {
        let mut best: Option<(Category, usize)> = None;
        let mut tied = false;

        for (category, terms) in &self.categories {
            let hits = tokens.iter().filter(|t| terms.contains(*t)).count();
            if hits == 0 {
                continue;
            }
            match best {
                Some((_, best_hits)) if hits == best_hits => tied = true,
                Some((_, best_hits)) if hits < best_hits => {}
                _ => {
                    best = Some((*category, hits));
                    tied = false;
                }
            }
        }

        match best {
            Some((category, _)) if !tied => Field::Known(category),
            _ => Field::Unknown,
        }
    }

    /// First configured intent with a matching term
    pub fn detect_intent(&self, text: &str) -> QueryIntent {
        let phrase = Self::phrase(text);
        self.intents
            .iter()
            .find(|(_, terms)| {
                terms
                    .iter()
                    .any(|term| phrase.contains(&format!(" {} ", term)))
            })
            .map(|(intent, _)| *intent)
            .unwrap_or(QueryIntent::General)
    }

    fn phrase(text: &str) -> String {
        format!(" {} ", Self::raw_tokens(text).join(" "))
    }
}
