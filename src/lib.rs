//! ESG MemoRAG - conversational analyst over company ESG indicators
//!
//! Questions are parsed into company, year and indicator entities, matched
//! against an embedded observation store, reranked by metadata fit, and
//! answered from the retrieved evidence. Session memory lets follow-up
//! questions inherit whatever they leave out.

pub mod cli;
pub mod compose;
pub mod config;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod lexicon;
pub mod memory;
pub mod pipeline;
pub mod retrieval;
pub mod session;
pub mod storage;

pub use error::{MemoragError, Result};
