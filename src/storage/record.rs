//! Observation records: one indicator value for one company and year

use crate::entities::Category;
use crate::error::{MemoragError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Record identifier, `{ticker}_{year}_{indicator_code}`
pub type RecordId = String;

/// Reported value of an indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ObservationValue {
    Numeric(f64),
    Text(String),
    Missing,
}

impl ObservationValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, ObservationValue::Missing)
    }

    /// Interpret a raw JSON cell: numbers and numeric strings become
    /// `Numeric`, blank strings and null become `Missing`
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(ObservationValue::Numeric)
                .unwrap_or(ObservationValue::Missing),
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    ObservationValue::Missing
                } else if let Ok(n) = trimmed.parse::<f64>() {
                    ObservationValue::Numeric(n)
                } else {
                    ObservationValue::Text(trimmed.to_string())
                }
            }
            serde_json::Value::Bool(b) => ObservationValue::Text(b.to_string()),
            _ => ObservationValue::Missing,
        }
    }
}

impl fmt::Display for ObservationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationValue::Numeric(n) => write!(f, "{}", n),
            ObservationValue::Text(s) => f.write_str(s),
            ObservationValue::Missing => f.write_str("missing"),
        }
    }
}

/// Immutable indicator observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: RecordId,
    pub company: String,
    pub ticker: String,
    pub year: i32,
    pub indicator_code: String,
    pub indicator_name: String,
    pub category: Category,
    pub value: ObservationValue,
    /// Data quality in [0, 1]
    pub validity: f32,
    pub source_file: String,
}

impl ObservationRecord {
    pub fn make_id(ticker: &str, year: i32, indicator_code: &str) -> RecordId {
        format!("{}_{}_{}", ticker, year, indicator_code)
    }

    /// Text the record is embedded from
    pub fn embedding_text(&self) -> String {
        format!(
            "{} ({}) in {}: {} (code={}) = {}",
            self.company, self.ticker, self.year, self.indicator_name, self.indicator_code, self.value
        )
    }
}

/// One line of an import file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRow {
    pub company: String,
    pub ticker: String,
    pub year: i32,
    pub indicator_code: String,
    pub indicator_name: String,
    pub category: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub validity: Option<f32>,
    #[serde(default)]
    pub incomplete: Option<bool>,
    #[serde(default)]
    pub source_file: Option<String>,
}

impl ObservationRow {
    /// Validate and convert into a record.
    ///
    /// Without an explicit validity, complete values score 1.0 and missing
    /// or incomplete ones 0.0.
    pub fn into_record(self) -> Result<ObservationRecord> {
        if self.company.trim().is_empty() || self.ticker.trim().is_empty() {
            return Err(MemoragError::InvalidConfigValue {
                path: "observation".to_string(),
                message: "company and ticker are required".to_string(),
            });
        }
        if self.indicator_code.trim().is_empty() {
            return Err(MemoragError::InvalidConfigValue {
                path: "observation.indicator_code".to_string(),
                message: format!("missing indicator code for {}", self.company),
            });
        }

        let category: Category = self.category.parse()?;
        let value = ObservationValue::from_json(&self.value);
        let validity = match self.validity {
            Some(v) => v.clamp(0.0, 1.0),
            None if value.is_missing() || self.incomplete.unwrap_or(false) => 0.0,
            None => 1.0,
        };
        let ticker = self.ticker.trim().to_string();
        let indicator_code = self.indicator_code.trim().to_uppercase();

        Ok(ObservationRecord {
            id: ObservationRecord::make_id(&ticker, self.year, &indicator_code),
            company: self.company.trim().to_string(),
            ticker,
            year: self.year,
            indicator_code,
            indicator_name: self.indicator_name.trim().to_string(),
            category,
            value,
            validity,
            source_file: self.source_file.unwrap_or_default(),
        })
    }
}

/// Read a JSON-lines file of observation rows; blank lines are skipped
pub fn read_rows(path: &Path) -> Result<Vec<ObservationRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| MemoragError::Io {
        source: e,
        context: format!("Failed to read observations file: {:?}", path),
    })?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: ObservationRow = serde_json::from_str(line).map_err(|e| MemoragError::Json {
            source: e,
            context: format!("{}:{}", path.display(), line_no + 1),
        })?;
        records.push(row.into_record()?);
    }
    Ok(records)
}
