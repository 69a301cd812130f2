//! Session context
//!
//! Ordered query turns of one conversation and the entity set the next
//! turn carries over from.
use crate::compose::ResponseMode;
use crate::entities::{EntitySet, QueryIntent};
use crate::retrieval::RankedResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No turns and nothing to carry over
    Empty,
    /// At least one recorded turn
    Active,
}

/// One answered query. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTurn {
    pub id: Uuid,

    /// Text as the user typed it
    pub raw_text: String,

    /// Entities after carryover
    pub entities: EntitySet,

    pub intent: QueryIntent,

    pub timestamp: DateTime<Utc>,

    /// Reranked evidence the response was built from
    pub results: Vec<RankedResult>,

    pub response: String,

    /// Strategy that produced `response`
    pub strategy: ResponseMode,

    /// Coverage notes on `results`
    #[serde(default)]
    pub insights: Vec<String>,
}

impl QueryTurn {
    pub fn new(
        raw_text: impl Into<String>,
        entities: EntitySet,
        intent: QueryIntent,
        results: Vec<RankedResult>,
        response: impl Into<String>,
        strategy: ResponseMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_text: raw_text.into(),
            entities,
            intent,
            timestamp: Utc::now(),
            results,
            response: response.into(),
            strategy,
            insights: Vec::new(),
        }
    }

    pub fn with_insights(mut self, insights: Vec<String>) -> Self {
        self.insights = insights;
        self
    }
}

/// History of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,

    pub started_at: DateTime<Utc>,

    /// Oldest first
    pub turns: Vec<QueryTurn>,

    /// Entities of the most recent turn
    pub last_entities: EntitySet,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            turns: Vec::new(),
            last_entities: EntitySet::unknown(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.turns.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Active
        }
    }

    /// Entities the next turn inherits; fully unknown when Empty
    pub fn carryover(&self) -> EntitySet {
        match self.state() {
            SessionState::Empty => EntitySet::unknown(),
            SessionState::Active => self.last_entities.clone(),
        }
    }

    /// Append a turn, dropping the oldest ones beyond `max_turns`
    pub fn push_turn(&mut self, turn: QueryTurn, max_turns: usize) {
        self.last_entities = turn.entities.clone();
        self.turns.push(turn);

        let max_turns = max_turns.max(1);
        if self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }

    pub fn last_turn(&self) -> Option<&QueryTurn> {
        self.turns.last()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Time since the session started
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
