//! Context & memory
//!
//! Process-wide store of session contexts plus aggregate pattern counters,
//! mutated only through [`MemoryManager`].

mod manager;
mod persistence;
mod report;

pub use manager::MemoryManager;
pub use persistence::{JsonFilePersistence, MemoryPersistence, MemorySnapshot};
pub use report::{MemoryReport, PatternCount};

use crate::entities::EntitySet;
use crate::error::{MemoragError, Result};
use crate::session::{QueryTurn, SessionContext};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Company x indicator x year counters, plus per-company and per-year tallies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCounters {
    pub combinations: BTreeMap<String, u64>,
    pub companies: BTreeMap<String, u64>,
    pub years: BTreeMap<i32, u64>,
}

impl PatternCounters {
    /// Count one resolved entity set; fully unknown sets are not counted
    pub fn observe(&mut self, entities: &EntitySet) {
        if !entities.has_issuer() && !entities.has_indicator() && !entities.year.is_known() {
            return;
        }

        *self.combinations.entry(entities.pattern_key()).or_insert(0) += 1;

        if let Some(company) = entities.company.known().or(entities.ticker.known()) {
            *self.companies.entry(company.clone()).or_insert(0) += 1;
        }
        if let Some(year) = entities.year.known() {
            *self.years.entry(*year).or_insert(0) += 1;
        }
    }

    pub fn distinct_patterns(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
}

/// Sessions partitioned by id, counters behind one lock
pub struct MemoryStore {
    sessions: DashMap<String, SessionContext>,
    patterns: Mutex<PatternCounters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            patterns: Mutex::new(PatternCounters::default()),
        }
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        let sessions = DashMap::new();
        for session in snapshot.sessions {
            sessions.insert(session.session_id.clone(), session);
        }
        Self {
            sessions,
            patterns: Mutex::new(snapshot.patterns),
        }
    }

    /// Consistent copy for persistence; sessions ordered by id
    pub fn snapshot(&self) -> Result<MemorySnapshot> {
        let mut sessions: Vec<SessionContext> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        Ok(MemorySnapshot::new(sessions, self.lock_patterns()?.clone()))
    }

    /// Cloned view of one session
    pub fn session(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Append `turn` to the session (creating it) and count its pattern
    pub fn record(&self, session_id: &str, turn: QueryTurn, max_turns: usize) -> Result<()> {
        let entities = turn.entities.clone();
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id))
            .push_turn(turn, max_turns);

        self.lock_patterns()?.observe(&entities);
        Ok(())
    }

    pub fn remove_session(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn patterns(&self) -> Result<PatternCounters> {
        Ok(self.lock_patterns()?.clone())
    }

    pub fn reset_patterns(&self) -> Result<()> {
        *self.lock_patterns()? = PatternCounters::default();
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Timestamps of every stored turn, across sessions
    pub fn turn_timestamps(&self) -> Vec<chrono::DateTime<chrono::Utc>> {
        self.sessions
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .turns
                    .iter()
                    .map(|turn| turn.timestamp)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn lock_patterns(&self) -> Result<MutexGuard<'_, PatternCounters>> {
        self.patterns
            .lock()
            .map_err(|e| MemoragError::Other(anyhow::anyhow!("pattern counters lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
