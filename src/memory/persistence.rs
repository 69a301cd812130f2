//! Memory persistence

use crate::error::{MemoragError, Result};
use crate::memory::PatternCounters;
use crate::session::SessionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub sessions: Vec<SessionContext>,
    pub patterns: PatternCounters,
}

impl MemorySnapshot {
    pub fn new(sessions: Vec<SessionContext>, patterns: PatternCounters) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            sessions,
            patterns,
        }
    }
}

/// Where the memory store is loaded from and saved to
pub trait MemoryPersistence: Send + Sync {
    /// Previously saved snapshot, or `None` when nothing was saved yet
    fn load(&self) -> Result<Option<MemorySnapshot>>;

    fn save(&self, snapshot: &MemorySnapshot) -> Result<()>;
}

/// Pretty-printed JSON file, replaced atomically on save
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryPersistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<MemorySnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| MemoragError::Io {
            source: e,
            context: format!("Failed to read memory file: {}", self.path.display()),
        })?;
        let snapshot: MemorySnapshot =
            serde_json::from_str(&content).map_err(|e| MemoragError::Json {
                source: e,
                context: format!("Failed to parse memory file: {}", self.path.display()),
            })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(MemoragError::Persistence(format!(
                "memory file version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &MemorySnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoragError::Io {
                source: e,
                context: format!("Failed to create memory directory: {}", parent.display()),
            })?;
        }

        let content = serde_json::to_string_pretty(snapshot).map_err(|e| MemoragError::Json {
            source: e,
            context: "Failed to serialize memory".to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| MemoragError::Io {
            source: e,
            context: format!("Failed to write memory file: {}", tmp.display()),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| MemoragError::Io {
            source: e,
            context: format!("Failed to replace memory file: {}", self.path.display()),
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_none() {
        let temp = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(temp.path().join("memory.json"));
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(temp.path().join("nested").join("memory.json"));

        let mut patterns = PatternCounters::default();
        patterns.combinations.insert("Alcoa Corp|ES01|2016".to_string(), 3);
        let snapshot = MemorySnapshot::new(vec![SessionContext::new("s1")], patterns);
        persistence.save(&snapshot).unwrap();

        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.patterns.combinations["Alcoa Corp|ES01|2016"], 3);
        assert!(!temp.path().join("nested").join("memory.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonFilePersistence::new(path).load().is_err());
    }
}
