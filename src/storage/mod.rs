//! Storage layer
//!
//! Row-level observation records and their embeddings in SQLite

pub mod database;
pub mod record;

pub use database::{decode_vector, encode_vector, Database, DbPool, DbStats, RecordFilter, StoredEmbedding};
pub use record::{read_rows, ObservationRecord, ObservationRow, ObservationValue, RecordId};
