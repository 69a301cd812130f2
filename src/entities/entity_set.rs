//! Structured entity set resolved from a query

use crate::error::MemoragError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A field that is either explicitly unknown or known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Field<T> {
    Unknown,
    Known(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unknown
    }
}

impl<T> Field<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Field::Known(_))
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Field::Known(value) => Some(value),
            Field::Unknown => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Field::Known(v),
            None => Field::Unknown,
        }
    }
}

/// ESG category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Environmental,
    Social,
    Governance,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Environmental => "environmental",
            Category::Social => "social",
            Category::Governance => "governance",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MemoragError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "environmental" | "environment" | "e" => Ok(Category::Environmental),
            "social" | "s" => Ok(Category::Social),
            "governance" | "g" => Ok(Category::Governance),
            other => Err(MemoragError::Config(format!("Unknown ESG category: {}", other))),
        }
    }
}

/// What kind of answer the question is after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Trend,
    Comparison,
    Specific,
    Overview,
    Analysis,
    #[default]
    General,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Trend => "trend",
            QueryIntent::Comparison => "comparison",
            QueryIntent::Specific => "specific",
            QueryIntent::Overview => "overview",
            QueryIntent::Analysis => "analysis",
            QueryIntent::General => "general",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryIntent {
    type Err = MemoragError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trend" => Ok(QueryIntent::Trend),
            "comparison" => Ok(QueryIntent::Comparison),
            "specific" => Ok(QueryIntent::Specific),
            "overview" => Ok(QueryIntent::Overview),
            "analysis" => Ok(QueryIntent::Analysis),
            "general" => Ok(QueryIntent::General),
            other => Err(MemoragError::Config(format!("Unknown query intent: {}", other))),
        }
    }
}

/// Names of the entity fields, used in traces and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityField {
    Company,
    Ticker,
    Year,
    IndicatorCode,
    Category,
}

/// Entities resolved for one query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntitySet {
    pub company: Field<String>,
    pub ticker: Field<String>,
    pub year: Field<i32>,
    pub indicator_code: Field<String>,
    pub category: Field<Category>,
}

impl EntitySet {
    /// Fully unknown set
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.known_count() == 0
    }

    pub fn known_count(&self) -> usize {
        [
            self.company.is_known(),
            self.ticker.is_known(),
            self.year.is_known(),
            self.indicator_code.is_known(),
            self.category.is_known(),
        ]
        .iter()
        .filter(|k| **k)
        .count()
    }

    pub fn has_issuer(&self) -> bool {
        self.company.is_known() || self.ticker.is_known()
    }

    pub fn has_indicator(&self) -> bool {
        self.indicator_code.is_known()
    }

    /// Fill fields the text left unknown from `prior`.
    ///
    /// Company and ticker travel together, as do indicator code and
    /// category: once the current text sets either member of a group, the
    /// other member is not taken from `prior`.
    pub fn with_carryover(&self, prior: &EntitySet) -> (EntitySet, Vec<EntityField>) {
        let mut merged = self.clone();
        let mut carried = Vec::new();

        if !self.has_issuer() {
            if prior.company.is_known() {
                merged.company = prior.company.clone();
                carried.push(EntityField::Company);
            }
            if prior.ticker.is_known() {
                merged.ticker = prior.ticker.clone();
                carried.push(EntityField::Ticker);
            }
        }

        if !self.year.is_known() && prior.year.is_known() {
            merged.year = prior.year.clone();
            carried.push(EntityField::Year);
        }

        if !self.indicator_code.is_known() && !self.category.is_known() {
            if prior.indicator_code.is_known() {
                merged.indicator_code = prior.indicator_code.clone();
                carried.push(EntityField::IndicatorCode);
            }
            if prior.category.is_known() {
                merged.category = prior.category.clone();
                carried.push(EntityField::Category);
            }
        }

        (merged, carried)
    }

    /// Key for the company x indicator x year pattern counters
    pub fn pattern_key(&self) -> String {
        let company = self
            .company
            .known()
            .or(self.ticker.known())
            .map(String::as_str)
            .unwrap_or("*");
        let indicator = self.indicator_code.known().map(String::as_str).unwrap_or("*");
        let year = self
            .year
            .known()
            .map(|y| y.to_string())
            .unwrap_or_else(|| "*".to_string());
        format!("{}|{}|{}", company, indicator, year)
    }

    /// One-line description of the known fields
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(company) = self.company.known() {
            parts.push(format!("company={}", company));
        }
        if let Some(ticker) = self.ticker.known() {
            parts.push(format!("ticker={}", ticker));
        }
        if let Some(year) = self.year.known() {
            parts.push(format!("year={}", year));
        }
        if let Some(code) = self.indicator_code.known() {
            parts.push(format!("indicator={}", code));
        }
        if let Some(category) = self.category.known() {
            parts.push(format!("category={}", category));
        }
        if parts.is_empty() {
            "(none)".to_string()
        } else {
            parts.join(", ")
        }
    }
}
