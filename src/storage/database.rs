//! SQLite database management with migrations
//!
//! Holds the observation records, their embeddings, and the catalog queries
//! the extractor resolves names against.

use crate::entities::{Catalog, Category, CompanyEntry, IndicatorEntry};
use crate::error::{MemoragError, Result};
use crate::storage::record::{ObservationRecord, ObservationValue, RecordId};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Structural filter applied before similarity scoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub company: Option<String>,
    pub ticker: Option<String>,
    pub year: Option<i32>,
    pub indicator_code: Option<String>,
    pub min_validity: f32,
}

/// Stored embedding with the row id the vector index uses
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub row_id: i64,
    pub record_id: RecordId,
    pub vector: Vec<f32>,
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoragError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| MemoragError::Config(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoragError::Config(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Whether a record with this id is already stored
    pub fn contains(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT row_id FROM observations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a record with its embedding.
    ///
    /// Returns `Ok(None)` and leaves the stored row and vector untouched when
    /// the (ticker, year, indicator_code) key already exists.
    pub fn insert_observation(
        &self,
        record: &ObservationRecord,
        vector: &[f32],
        model: &str,
    ) -> Result<Option<i64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let (value_num, value_text) = match &record.value {
            ObservationValue::Numeric(n) => (Some(*n), None),
            ObservationValue::Text(s) => (None, Some(s.as_str())),
            ObservationValue::Missing => (None, None),
        };

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO observations
                (id, company, ticker, year, indicator_code, indicator_name, category,
                 value_num, value_text, validity, source_file, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, strftime('%s','now'))",
            params![
                record.id,
                record.company,
                record.ticker,
                record.year,
                record.indicator_code,
                record.indicator_name,
                record.category.as_str(),
                value_num,
                value_text,
                record.validity,
                record.source_file,
            ],
        )?;

        if inserted == 0 {
            tx.commit()?;
            return Ok(None);
        }

        let row_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO embeddings (row_id, vector, model, created_at)
             VALUES (?1, ?2, ?3, strftime('%s','now'))",
            params![row_id, encode_vector(vector), model],
        )?;
        tx.commit()?;

        Ok(Some(row_id))
    }

    /// Fetch one record by id
    pub fn get_record(&self, id: &str) -> Result<Option<ObservationRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM observations WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Record id for a vector-index row id
    pub fn record_id_for_row(&self, row_id: i64) -> Result<Option<RecordId>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM observations WHERE row_id = ?1",
                params![row_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Embeddings of the records passing `filter`
    pub fn filtered_embeddings(&self, filter: &RecordFilter) -> Result<Vec<StoredEmbedding>> {
        let (clause, args) = filter_clause(filter);
        let sql = format!(
            "SELECT o.row_id, o.id, e.vector FROM observations o
             JOIN embeddings e ON e.row_id = o.row_id
             WHERE {} ORDER BY o.row_id",
            clause
        );

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            embedding_from_row,
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(MemoragError::from)
    }

    /// Ids of at most `limit` records passing `filter`, highest validity
    /// first, then in insertion order
    pub fn filtered_ids(&self, filter: &RecordFilter, limit: usize) -> Result<Vec<RecordId>> {
        let (clause, mut args) = filter_clause(filter);
        args.push(Box::new(limit as i64));
        let sql = format!(
            "SELECT o.id FROM observations o
             WHERE {} ORDER BY o.validity DESC, o.row_id LIMIT ?{}",
            clause,
            args.len()
        );

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get::<_, String>(0),
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(MemoragError::from)
    }

    /// Every stored embedding, for rebuilding the vector index
    pub fn all_embeddings(&self) -> Result<Vec<StoredEmbedding>> {
        self.filtered_embeddings(&RecordFilter {
            min_validity: f32::MIN,
            ..Default::default()
        })
    }

    /// Distinct companies and indicators
    pub fn catalog(&self) -> Result<Catalog> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare("SELECT DISTINCT company, ticker FROM observations")?;
        let companies = stmt
            .query_map([], |row| {
                Ok(CompanyEntry {
                    name: row.get(0)?,
                    ticker: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT indicator_code, MIN(indicator_name), MIN(category)
             FROM observations GROUP BY indicator_code",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut indicators = Vec::with_capacity(rows.len());
        for (code, name, category) in rows {
            indicators.push(IndicatorEntry {
                code,
                name,
                category: category.parse::<Category>()?,
            });
        }

        let mut stmt = conn.prepare("SELECT DISTINCT indicator_code, company FROM observations")?;
        let reporters = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Catalog::new(companies, indicators).with_reporters(reporters))
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            observation_count: count("SELECT COUNT(*) FROM observations")?,
            embedding_count: count("SELECT COUNT(*) FROM embeddings")?,
            company_count: count("SELECT COUNT(DISTINCT company) FROM observations")?,
            indicator_count: count("SELECT COUNT(DISTINCT indicator_code) FROM observations")?,
            missing_value_count: count(
                "SELECT COUNT(*) FROM observations WHERE value_num IS NULL AND value_text IS NULL",
            )?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub observation_count: usize,
    pub embedding_count: usize,
    pub company_count: usize,
    pub indicator_count: usize,
    pub missing_value_count: usize,
}

const RECORD_COLUMNS: &str = "id, company, ticker, year, indicator_code, indicator_name, \
                              category, value_num, value_text, validity, source_file";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ObservationRecord> {
    let category: String = row.get(6)?;
    let category = category.parse::<Category>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let value_num: Option<f64> = row.get(7)?;
    let value_text: Option<String> = row.get(8)?;
    let value = match (value_num, value_text) {
        (Some(n), _) => ObservationValue::Numeric(n),
        (None, Some(s)) => ObservationValue::Text(s),
        (None, None) => ObservationValue::Missing,
    };

    Ok(ObservationRecord {
        id: row.get(0)?,
        company: row.get(1)?,
        ticker: row.get(2)?,
        year: row.get(3)?,
        indicator_code: row.get(4)?,
        indicator_name: row.get(5)?,
        category,
        value,
        validity: row.get(9)?,
        source_file: row.get(10)?,
    })
}

fn embedding_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEmbedding> {
    let bytes: Vec<u8> = row.get(2)?;
    Ok(StoredEmbedding {
        row_id: row.get(0)?,
        record_id: row.get(1)?,
        vector: decode_vector(&bytes),
    })
}

/// WHERE clause and positional arguments for `filter` over `observations o`
fn filter_clause(filter: &RecordFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut sql = String::from("o.validity >= ?1");
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(filter.min_validity)];

    if let Some(company) = &filter.company {
        args.push(Box::new(company.clone()));
        sql.push_str(&format!(" AND o.company = ?{} COLLATE NOCASE", args.len()));
    }
    if let Some(ticker) = &filter.ticker {
        args.push(Box::new(ticker.clone()));
        sql.push_str(&format!(" AND o.ticker = ?{} COLLATE NOCASE", args.len()));
    }
    if let Some(year) = filter.year {
        args.push(Box::new(year));
        sql.push_str(&format!(" AND o.year = ?{}", args.len()));
    }
    if let Some(code) = &filter.indicator_code {
        args.push(Box::new(code.clone()));
        sql.push_str(&format!(" AND o.indicator_code = ?{} COLLATE NOCASE", args.len()));
    }

    (sql, args)
}

/// Little-endian f32 encoding
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: observations and their embeddings
    r#"
    CREATE TABLE observations (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        company TEXT NOT NULL,
        ticker TEXT NOT NULL,
        year INTEGER NOT NULL,
        indicator_code TEXT NOT NULL,
        indicator_name TEXT NOT NULL,
        category TEXT NOT NULL,
        value_num REAL,
        value_text TEXT,
        validity REAL NOT NULL,
        source_file TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        UNIQUE (ticker, year, indicator_code)
    );

    CREATE INDEX idx_observations_company ON observations(company COLLATE NOCASE);
    CREATE INDEX idx_observations_year ON observations(year);
    CREATE INDEX idx_observations_indicator ON observations(indicator_code);

    CREATE TABLE embeddings (
        row_id INTEGER PRIMARY KEY,
        vector BLOB NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (row_id) REFERENCES observations(row_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model);
    "#,
];
