//! Entity extraction from raw query text
//!
//! Regexes and term lists come from the [`Lexicon`]; company and indicator
//! names are resolved against the [`Catalog`] of known records.

use crate::config::ExtractionConfig;
use crate::entities::matcher::{FuzzyMatcher, HeadToken, MatchCandidate, Resolution};
use crate::entities::{normalize_ticker, Catalog, EntityField, EntitySet, Field, QueryIntent};
use crate::error::{MemoragError, Result};
use crate::lexicon::Lexicon;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// Result of extracting entities from one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    /// Cleaned query text
    pub text: String,
    /// Entities found in the text alone
    pub extracted: EntitySet,
    /// Entities after carryover from the prior turn
    pub resolved: EntitySet,
    /// Fields taken from the prior turn
    pub carried: Vec<EntityField>,
    pub intent: QueryIntent,
    /// 0.3 issuer + 0.2 year + 0.3 indicator + 0.2 category
    pub confidence: f32,
    pub is_followup: bool,
}

/// Entity extractor over a lexicon and a catalog
pub struct EntityExtractor {
    lexicon: Lexicon,
    catalog: Catalog,
    settings: ExtractionConfig,
}

impl EntityExtractor {
    pub fn new(lexicon: Lexicon, catalog: Catalog, settings: ExtractionConfig) -> Self {
        Self {
            lexicon,
            catalog,
            settings,
        }
    }

    /// Replace the catalog after new records were imported
    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Extract entities from `raw_text`, filling gaps from `prior`
    pub fn extract(&self, raw_text: &str, prior: &EntitySet) -> Result<Extraction> {
        let text = Lexicon::clean(raw_text);
        if text.is_empty() {
            return Err(MemoragError::InvalidQuery("empty query".to_string()));
        }

        let tokens = self.lexicon.tokens(&text);
        let token_set: AHashSet<String> = tokens.iter().cloned().collect();
        let matcher = FuzzyMatcher::new(
            &self.lexicon,
            self.settings.match_threshold,
            self.settings.head_token_confidence,
            self.settings.ambiguity_margin,
        );

        let mut extracted = EntitySet {
            year: self.extract_year(&text),
            ticker: self.extract_ticker(&text),
            category: self.lexicon.detect_category(&tokens),
            ..Default::default()
        };

        let companies = self
            .catalog
            .companies()
            .iter()
            .map(|c| (c.name.as_str(), c.name.as_str()));
        extracted.company = Self::settle(
            "company",
            matcher.resolve(&token_set, companies, true, HeadToken::First),
            &prior.company,
        )?;

        extracted.indicator_code = match self.lexicon.indicator_code.captures(&text) {
            Some(caps) => Field::Known(caps[1].to_uppercase()),
            None => {
                let indicators = self
                    .catalog
                    .indicators()
                    .iter()
                    .map(|i| (i.code.as_str(), i.name.as_str()));
                Self::settle(
                    "indicator",
                    matcher.resolve(&token_set, indicators, false, HeadToken::Last),
                    &prior.indicator_code,
                )?
            }
        };

        let is_followup = self.lexicon.is_followup(&text);
        if is_followup && prior.is_empty() && !extracted.has_issuer() && !extracted.has_indicator()
        {
            return Err(MemoragError::MalformedFollowup { text });
        }

        let (resolved, carried) = extracted.with_carryover(prior);
        let intent = self.lexicon.detect_intent(&text);
        self.check_issuer_needed(&resolved, intent)?;
        let confidence = Self::confidence(&resolved);

        tracing::debug!(
            extracted = %extracted.describe(),
            resolved = %resolved.describe(),
            intent = %intent,
            "Extracted query entities"
        );

        Ok(Extraction {
            text,
            extracted,
            resolved,
            carried,
            intent,
            confidence,
            is_followup,
        })
    }

    /// An indicator reported by several companies needs an issuer unless the
    /// question spans companies on purpose
    fn check_issuer_needed(&self, resolved: &EntitySet, intent: QueryIntent) -> Result<()> {
        if resolved.has_issuer() || matches!(intent, QueryIntent::Comparison | QueryIntent::Overview) {
            return Ok(());
        }
        let Some(code) = resolved.indicator_code.known() else {
            return Ok(());
        };

        let reporters = self.catalog.reporters(code);
        if reporters.len() < 2 {
            return Ok(());
        }

        let token = self
            .catalog
            .indicator(code)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| code.clone());
        Err(MemoragError::AmbiguousEntity {
            field: "company".to_string(),
            token,
            candidates: reporters.to_vec(),
        })
    }

    /// First year in the configured range
    fn extract_year(&self, text: &str) -> Field<i32> {
        self.lexicon
            .year
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()))
            .find(|y| (self.settings.min_year..=self.settings.max_year).contains(y))
            .into()
    }

    fn extract_ticker(&self, text: &str) -> Field<String> {
        if let Some(m) = self.lexicon.ticker.find(text) {
            let ticker = normalize_ticker(m.as_str());
            return match self.catalog.find_ticker(&ticker) {
                Some(entry) => Field::Known(entry.ticker.clone()),
                None => Field::Known(ticker),
            };
        }

        let lowered = format!(" {} ", text.to_lowercase());
        self.catalog
            .companies()
            .iter()
            .find(|c| lowered.contains(&format!(" {} ", c.ticker.to_lowercase())))
            .map(|c| c.ticker.clone())
            .into()
    }

    /// Turn a match resolution into a field, letting the prior value break ties
    fn settle(field: &str, resolution: Resolution, prior: &Field<String>) -> Result<Field<String>> {
        match resolution {
            Resolution::NoMatch => Ok(Field::Unknown),
            Resolution::Unique(candidate) => Ok(Field::Known(candidate.key)),
            Resolution::Ambiguous(candidates) => {
                if let Some(previous) = prior.known() {
                    if candidates.iter().any(|c| &c.key == previous) {
                        return Ok(Field::Known(previous.clone()));
                    }
                }
                Err(Self::ambiguity(field, &candidates))
            }
        }
    }

    fn ambiguity(field: &str, candidates: &[MatchCandidate]) -> MemoragError {
        let mut token: Vec<String> = candidates
            .iter()
            .flat_map(|c| c.matched.iter().cloned())
            .collect();
        token.sort();
        token.dedup();

        MemoragError::AmbiguousEntity {
            field: field.to_string(),
            token: token.join(" "),
            candidates: candidates.iter().map(|c| c.label.clone()).collect(),
        }
    }

    fn confidence(entities: &EntitySet) -> f32 {
        let mut score = 0.0;
        if entities.has_issuer() {
            score += 0.3;
        }
        if entities.year.is_known() {
            score += 0.2;
        }
        if entities.indicator_code.is_known() {
            score += 0.3;
        }
        if entities.category.is_known() {
            score += 0.2;
        }
        f32::min(score, 1.0)
    }
}
