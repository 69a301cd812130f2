//! Memory manager: carryover, turn recording, reports, clearing

use crate::config::MemoryConfig;
use crate::entities::EntitySet;
use crate::error::Result;
use crate::memory::report::{top_n, top_patterns};
use crate::memory::{MemoryPersistence, MemoryReport, MemoryStore};
use crate::session::{QueryTurn, SessionContext, SessionState};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct MemoryManager {
    store: MemoryStore,
    persistence: Option<Box<dyn MemoryPersistence>>,
    config: MemoryConfig,
    durable: AtomicBool,
    /// Serializes snapshot-and-save so an older snapshot never replaces a newer one
    save_lock: Mutex<()>,
}

impl MemoryManager {
    /// Manager without persistence; nothing survives the process
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self {
            store: MemoryStore::new(),
            persistence: None,
            config,
            durable: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    /// Load the saved store. A missing snapshot starts fresh; any other load
    /// failure is returned.
    pub fn open(config: MemoryConfig, persistence: Box<dyn MemoryPersistence>) -> Result<Self> {
        let store = match persistence.load()? {
            Some(snapshot) => {
                tracing::info!(
                    "Memory loaded: {} sessions, {} patterns",
                    snapshot.sessions.len(),
                    snapshot.patterns.distinct_patterns()
                );
                MemoryStore::from_snapshot(snapshot)
            }
            None => {
                tracing::info!("No saved memory, starting fresh");
                MemoryStore::new()
            }
        };

        Ok(Self {
            store,
            persistence: Some(persistence),
            config,
            durable: AtomicBool::new(true),
            save_lock: Mutex::new(()),
        })
    }

    /// Entities the next turn of `session_id` inherits
    pub fn resolve_carryover(&self, session_id: &str) -> EntitySet {
        self.store
            .session(session_id)
            .map(|session| session.carryover())
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionContext> {
        self.store.session(session_id)
    }

    /// Append a completed turn and update the counters
    pub fn record_turn(&self, session_id: &str, turn: QueryTurn) -> Result<()> {
        self.store
            .record(session_id, turn, self.config.max_turns_per_session)?;
        self.persist();
        Ok(())
    }

    pub fn report(&self, session_id: &str) -> Result<MemoryReport> {
        let session = self.store.session(session_id);
        let patterns = self.store.patterns()?;
        let top = self.config.report_top_n;

        let mut session_counts: BTreeMap<String, u64> = BTreeMap::new();
        if let Some(session) = &session {
            for turn in &session.turns {
                *session_counts.entry(turn.entities.pattern_key()).or_insert(0) += 1;
            }
        }

        let timestamps = self.store.turn_timestamps();
        let window = chrono::Duration::days(self.config.recent_window_days);
        let now = Utc::now();
        let recent_turns = timestamps.iter().filter(|t| now - **t < window).count();

        Ok(MemoryReport {
            session_id: session_id.to_string(),
            session_state: session
                .as_ref()
                .map(|s| s.state())
                .unwrap_or(SessionState::Empty),
            turn_count: session.as_ref().map(|s| s.turn_count()).unwrap_or(0),
            session_age_secs: session.as_ref().map(|s| s.age().num_seconds()).unwrap_or(0),
            session_patterns: top_patterns(&session_counts, top),
            global_patterns: top_patterns(&patterns.combinations, top),
            total_sessions: self.store.session_count(),
            total_turns: timestamps.len(),
            recent_window_days: self.config.recent_window_days,
            recent_turns,
            popular_companies: top_n(&patterns.companies, top),
            popular_years: top_n(&patterns.years, top),
            distinct_patterns: patterns.distinct_patterns(),
            durable: self.is_durable(),
            generated_at: now,
        })
    }

    /// Drop the session's history and carryover. Counters are kept.
    pub fn clear(&self, session_id: &str) {
        if self.store.remove_session(session_id).is_some() {
            tracing::info!("Cleared session {}", session_id);
        }
        self.persist();
    }

    /// Zero every pattern counter
    pub fn reset_patterns(&self) -> Result<()> {
        self.store.reset_patterns()?;
        tracing::info!("Pattern counters reset");
        self.persist();
        Ok(())
    }

    /// Save now; used at shutdown where a failure should be reported
    pub fn flush(&self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            let _guard = self.lock_saves();
            persistence.save(&self.store.snapshot()?)?;
        }
        Ok(())
    }

    /// Whether memory is still being written to persistence
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn lock_saves(&self) -> MutexGuard<'_, ()> {
        self.save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let _guard = self.lock_saves();
        let result = self
            .store
            .snapshot()
            .and_then(|snapshot| persistence.save(&snapshot));
        match result {
            Ok(()) => {
                if !self.durable.swap(true, Ordering::SeqCst) {
                    tracing::info!("Memory persistence recovered");
                }
            }
            Err(e) => {
                if self.durable.swap(false, Ordering::SeqCst) {
                    tracing::warn!("Failed to save memory, continuing in-memory only: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ResponseMode;
    use crate::config::Config;
    use crate::entities::{Field, QueryIntent};
    use crate::error::MemoragError;
    use crate::memory::{JsonFilePersistence, MemorySnapshot};
    use tempfile::TempDir;

    struct FailingPersistence;

    impl MemoryPersistence for FailingPersistence {
        fn load(&self) -> Result<Option<MemorySnapshot>> {
            Ok(None)
        }

        fn save(&self, _snapshot: &MemorySnapshot) -> Result<()> {
            Err(MemoragError::Persistence("disk full".to_string()))
        }
    }

    struct BrokenLoad;

    impl MemoryPersistence for BrokenLoad {
        fn load(&self) -> Result<Option<MemorySnapshot>> {
            Err(MemoragError::Persistence("unreadable".to_string()))
        }

        fn save(&self, _snapshot: &MemorySnapshot) -> Result<()> {
            Ok(())
        }
    }

    fn turn(year: i32) -> QueryTurn {
        QueryTurn::new(
            "q",
            EntitySet {
                company: Field::Known("Agilent Technologies Inc".to_string()),
                year: Field::Known(year),
                indicator_code: Field::Known("ES03".to_string()),
                ..Default::default()
            },
            QueryIntent::Specific,
            Vec::new(),
            "a",
            ResponseMode::Extractive,
        )
    }

    #[test]
    fn test_carryover_lifecycle() {
        let manager = MemoryManager::in_memory(Config::default().memory);
        assert!(manager.resolve_carryover("s1").is_empty());

        manager.record_turn("s1", turn(2015)).unwrap();
        assert_eq!(manager.resolve_carryover("s1").year, Field::Known(2015));

        manager.clear("s1");
        assert!(manager.resolve_carryover("s1").is_empty());
    }

    #[test]
    fn test_clear_is_idempotent_and_keeps_counters() {
        let manager = MemoryManager::in_memory(Config::default().memory);
        manager.record_turn("s1", turn(2015)).unwrap();

        manager.clear("s1");
        let first = manager.report("s1").unwrap();
        manager.clear("s1");
        let second = manager.report("s1").unwrap();

        assert_eq!(first.turn_count, 0);
        assert_eq!(first.session_state, SessionState::Empty);
        assert_eq!(first.turn_count, second.turn_count);
        assert_eq!(first.global_patterns, second.global_patterns);
        assert_eq!(second.distinct_patterns, 1);
    }

    #[test]
    fn test_report_contents() {
        let manager = MemoryManager::in_memory(Config::default().memory);
        manager.record_turn("s1", turn(2015)).unwrap();
        manager.record_turn("s1", turn(2015)).unwrap();
        manager.record_turn("s1", turn(2016)).unwrap();
        manager.record_turn("s2", turn(2016)).unwrap();

        let report = manager.report("s1").unwrap();
        assert_eq!(report.turn_count, 3);
        assert_eq!(report.session_state, SessionState::Active);
        assert_eq!(report.session_patterns[0].pattern, "Agilent Technologies Inc|ES03|2015");
        assert_eq!(report.session_patterns[0].count, 2);
        assert_eq!(report.total_turns, 4);
        assert_eq!(report.recent_turns, 4);
        assert_eq!(report.total_sessions, 2);
        assert_eq!(report.popular_companies[0], ("Agilent Technologies Inc".to_string(), 4));
        assert_eq!(report.distinct_patterns, 2);
        assert!(report.render().contains("Popular years"));
    }

    #[test]
    fn test_reset_patterns() {
        let manager = MemoryManager::in_memory(Config::default().memory);
        manager.record_turn("s1", turn(2015)).unwrap();
        manager.reset_patterns().unwrap();
        let report = manager.report("s1").unwrap();
        assert_eq!(report.distinct_patterns, 0);
        assert_eq!(report.turn_count, 1);
    }

    #[test]
    fn test_persistence_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.json");
        {
            let manager = MemoryManager::open(
                Config::default().memory,
                Box::new(JsonFilePersistence::new(&path)),
            )
            .unwrap();
            manager.record_turn("s1", turn(2015)).unwrap();
            assert!(manager.is_durable());
        }

        let manager =
            MemoryManager::open(Config::default().memory, Box::new(JsonFilePersistence::new(&path)))
                .unwrap();
        assert_eq!(manager.resolve_carryover("s1").year, Field::Known(2015));
        assert_eq!(manager.report("s1").unwrap().distinct_patterns, 1);
    }

    #[test]
    fn test_save_failure_degrades() {
        let manager = MemoryManager::open(Config::default().memory, Box::new(FailingPersistence)).unwrap();
        manager.record_turn("s1", turn(2015)).unwrap();
        assert!(!manager.is_durable());
        // Still answers from memory
        assert_eq!(manager.resolve_carryover("s1").year, Field::Known(2015));
        assert!(manager.flush().is_err());
    }

    #[test]
    fn test_concurrent_turns_all_saved() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.json");
        let manager = MemoryManager::open(
            Config::default().memory,
            Box::new(JsonFilePersistence::new(&path)),
        )
        .unwrap();

        std::thread::scope(|scope| {
            for t in 0..8 {
                let manager = &manager;
                scope.spawn(move || {
                    for i in 0..20 {
                        manager
                            .record_turn(&format!("s{}", t), turn(2000 + i))
                            .unwrap();
                    }
                });
            }
        });
        assert!(manager.is_durable());

        let reopened =
            MemoryManager::open(Config::default().memory, Box::new(JsonFilePersistence::new(&path)))
                .unwrap();
        assert_eq!(reopened.report("s0").unwrap().total_turns, 160);
        for t in 0..8 {
            assert_eq!(reopened.report(&format!("s{}", t)).unwrap().turn_count, 20);
        }
    }

    #[test]
    fn test_load_failure_is_fatal() {
        assert!(MemoryManager::open(Config::default().memory, Box::new(BrokenLoad)).is_err());
    }
}
