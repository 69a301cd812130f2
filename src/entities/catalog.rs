//! Catalog of known companies and indicators, derived from the record store

use crate::entities::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Known issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyEntry {
    pub name: String,
    pub ticker: String,
}

/// Known indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorEntry {
    pub code: String,
    pub name: String,
    pub category: Category,
}

/// Companies and indicators the extractor can resolve against
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    companies: Vec<CompanyEntry>,
    indicators: Vec<IndicatorEntry>,
    /// Indicator code -> companies with records for it, sorted
    reporters: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    pub fn new(mut companies: Vec<CompanyEntry>, mut indicators: Vec<IndicatorEntry>) -> Self {
        companies.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.ticker.cmp(&b.ticker)));
        companies.dedup();
        indicators.sort_by(|a, b| a.code.cmp(&b.code));
        indicators.dedup_by(|a, b| a.code == b.code);
        Self {
            companies,
            indicators,
            reporters: BTreeMap::new(),
        }
    }

    /// Attach which companies report each indicator, as (code, company) pairs
    pub fn with_reporters(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        for (code, company) in pairs {
            self.reporters
                .entry(code.to_uppercase())
                .or_default()
                .push(company);
        }
        for companies in self.reporters.values_mut() {
            companies.sort();
            companies.dedup();
        }
        self
    }

    /// Companies with records for `code`
    pub fn reporters(&self, code: &str) -> &[String] {
        self.reporters
            .get(&code.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn companies(&self) -> &[CompanyEntry] {
        &self.companies
    }

    pub fn indicators(&self) -> &[IndicatorEntry] {
        &self.indicators
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty() && self.indicators.is_empty()
    }

    /// Catalog ticker equal to `ticker`, ignoring case and spacing
    pub fn find_ticker(&self, ticker: &str) -> Option<&CompanyEntry> {
        let wanted = normalize_ticker(ticker);
        self.companies
            .iter()
            .find(|c| normalize_ticker(&c.ticker) == wanted)
    }

    pub fn indicator(&self, code: &str) -> Option<&IndicatorEntry> {
        self.indicators
            .iter()
            .find(|i| i.code.eq_ignore_ascii_case(code))
    }
}

/// Upper-case with single spaces: `a  us equity` -> `A US EQUITY`
pub fn normalize_ticker(ticker: &str) -> String {
    ticker
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
