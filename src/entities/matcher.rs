//! Token-coverage fuzzy matching of query text against catalog names

use crate::lexicon::Lexicon;
use ahash::AHashSet;

/// Which significant token of a name identifies it on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadToken {
    /// "Agilent" in "Agilent Technologies Inc"
    First,
    /// "Emissions" in "Nitrogen Oxide Emissions"
    Last,
}

/// A catalog entry the query plausibly refers to
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    /// Identity of the entry (company name or indicator code)
    pub key: String,
    /// Human-readable label
    pub label: String,
    pub confidence: f32,
    /// Query tokens that matched
    pub matched: Vec<String>,
}

/// Outcome of matching one entity kind
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    NoMatch,
    Unique(MatchCandidate),
    Ambiguous(Vec<MatchCandidate>),
}

pub struct FuzzyMatcher<'a> {
    lexicon: &'a Lexicon,
    threshold: f32,
    head_confidence: f32,
    margin: f32,
}

impl<'a> FuzzyMatcher<'a> {
    pub fn new(lexicon: &'a Lexicon, threshold: f32, head_confidence: f32, margin: f32) -> Self {
        Self {
            lexicon,
            threshold,
            head_confidence,
            margin,
        }
    }

    /// Confidence that `query_tokens` mention `name`, with matched tokens
    pub fn score(
        &self,
        query_tokens: &AHashSet<String>,
        name: &str,
        issuer: bool,
        head: HeadToken,
    ) -> (f32, Vec<String>) {
        let significant = self.lexicon.significant_tokens(name, issuer);
        if significant.is_empty() {
            return (0.0, Vec::new());
        }

        let matched: Vec<String> = significant
            .iter()
            .filter(|t| query_tokens.contains(*t))
            .cloned()
            .collect();
        let mut confidence = matched.len() as f32 / significant.len() as f32;

        let head_token = match head {
            HeadToken::First => significant.first(),
            HeadToken::Last => significant.last(),
        };
        if head_token.is_some_and(|t| query_tokens.contains(t)) {
            confidence = confidence.max(self.head_confidence);
        }

        (confidence, matched)
    }

    /// Score `(key, label)` entries and resolve them to one match, several
    /// near-equal matches, or none
    pub fn resolve<'e, I>(
        &self,
        query_tokens: &AHashSet<String>,
        entries: I,
        issuer: bool,
        head: HeadToken,
    ) -> Resolution
    where
        I: IntoIterator<Item = (&'e str, &'e str)>,
    {
        let mut candidates: Vec<MatchCandidate> = Vec::new();
        for (key, label) in entries {
            if candidates.iter().any(|c| c.key == key) {
                continue;
            }
            let (confidence, matched) = self.score(query_tokens, label, issuer, head);
            if confidence >= self.threshold && !matched.is_empty() {
                candidates.push(MatchCandidate {
                    key: key.to_string(),
                    label: label.to_string(),
                    confidence,
                    matched,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.key.cmp(&b.key))
        });

        let Some(best) = candidates.first().map(|c| c.confidence) else {
            return Resolution::NoMatch;
        };

        let mut contenders: Vec<MatchCandidate> = candidates
            .into_iter()
            .filter(|c| best - c.confidence <= self.margin + f32::EPSILON)
            .collect();

        if contenders.len() == 1 {
            Resolution::Unique(contenders.remove(0))
        } else {
            Resolution::Ambiguous(contenders)
        }
    }
}
