//! Query understanding
//!
//! This module provides:
//! - The entity set model with explicit `Unknown` fields
//! - The catalog of known companies and indicators
//! - Token-coverage fuzzy matching against that catalog
//! - The extractor tying lexicon, catalog and carryover together

mod catalog;
mod entity_set;
mod extractor;
mod matcher;

pub use catalog::{normalize_ticker, Catalog, CompanyEntry, IndicatorEntry};
pub use entity_set::{Category, EntityField, EntitySet, Field, QueryIntent};
pub use extractor::{EntityExtractor, Extraction};
pub use matcher::{FuzzyMatcher, HeadToken, MatchCandidate, Resolution};
