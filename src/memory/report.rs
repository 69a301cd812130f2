//! Memory report

use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A counted entity combination, `company|indicator|year` with `*` for unknown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCount {
    pub pattern: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub session_id: String,
    pub session_state: SessionState,
    pub turn_count: usize,
    pub session_age_secs: i64,
    /// Most frequent combinations in this session
    pub session_patterns: Vec<PatternCount>,
    /// Most frequent combinations across all sessions
    pub global_patterns: Vec<PatternCount>,
    pub total_sessions: usize,
    pub total_turns: usize,
    pub recent_window_days: i64,
    pub recent_turns: usize,
    pub popular_companies: Vec<(String, u64)>,
    pub popular_years: Vec<(i32, u64)>,
    pub distinct_patterns: usize,
    /// False once a save failed and memory is held in-process only
    pub durable: bool,
    pub generated_at: DateTime<Utc>,
}

impl MemoryReport {
    pub fn render(&self) -> String {
        let mut lines = vec![
            "Memory Report".to_string(),
            "=".repeat(50),
            format!(
                "Session {}: {} turns ({:?}), age {}",
                self.session_id,
                self.turn_count,
                self.session_state,
                format_age(self.session_age_secs)
            ),
        ];
        if !self.session_patterns.is_empty() {
            lines.push("Session patterns:".to_string());
            lines.extend(pattern_lines(&self.session_patterns));
        }

        lines.push(format!("Total sessions: {}", self.total_sessions));
        lines.push(format!("Total queries: {}", self.total_turns));
        lines.push(format!(
            "Recent queries ({} days): {}",
            self.recent_window_days, self.recent_turns
        ));
        lines.push(format!(
            "Popular companies: {}",
            join_counts(self.popular_companies.iter().map(|(c, n)| (c.clone(), *n)))
        ));
        lines.push(format!(
            "Popular years: {}",
            join_counts(self.popular_years.iter().map(|(y, n)| (y.to_string(), *n)))
        ));
        lines.push(format!("Pattern count: {}", self.distinct_patterns));
        if !self.global_patterns.is_empty() {
            lines.push("Top patterns:".to_string());
            lines.extend(pattern_lines(&self.global_patterns));
        }
        if !self.durable {
            lines.push("Warning: memory is not being saved to disk".to_string());
        }
        lines.join("\n")
    }
}

fn pattern_lines(patterns: &[PatternCount]) -> impl Iterator<Item = String> + '_ {
    patterns.iter().map(|p| format!("  {} x{}", p.pattern, p.count))
}

/// Highest counts first, ties by key, at most `n`
pub(crate) fn top_n<K: Ord + Clone>(counts: &BTreeMap<K, u64>, n: usize) -> Vec<(K, u64)> {
    let mut entries: Vec<(K, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

pub(crate) fn top_patterns(counts: &BTreeMap<String, u64>, n: usize) -> Vec<PatternCount> {
    top_n(counts, n)
        .into_iter()
        .map(|(pattern, count)| PatternCount { pattern, count })
        .collect()
}

fn join_counts(items: impl Iterator<Item = (String, u64)>) -> String {
    let joined: Vec<String> = items.map(|(k, n)| format!("{} ({})", k, n)).collect();
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined.join(", ")
    }
}

fn format_age(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h{}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_n_orders_by_count_then_key() {
        let mut counts = BTreeMap::new();
        counts.insert("b".to_string(), 2);
        counts.insert("a".to_string(), 2);
        counts.insert("c".to_string(), 5);
        counts.insert("d".to_string(), 1);

        let top = top_n(&counts, 3);
        assert_eq!(
            top,
            vec![("c".to_string(), 5), ("a".to_string(), 2), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn test_render_lines() {
        let report = MemoryReport {
            session_id: "s1".to_string(),
            session_state: SessionState::Active,
            turn_count: 2,
            session_age_secs: 125,
            session_patterns: vec![PatternCount {
                pattern: "Alcoa Corp|ES01|2015".to_string(),
                count: 2,
            }],
            global_patterns: Vec::new(),
            total_sessions: 1,
            total_turns: 2,
            recent_window_days: 7,
            recent_turns: 2,
            popular_companies: vec![("Alcoa Corp".to_string(), 2)],
            popular_years: Vec::new(),
            distinct_patterns: 1,
            durable: false,
            generated_at: Utc::now(),
        };

        let text = report.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Memory Report");
        assert_eq!(lines[2], "Session s1: 2 turns (Active), age 2m");
        assert_eq!(lines[4], "  Alcoa Corp|ES01|2015 x2");
        assert!(lines.contains(&"Popular companies: Alcoa Corp (2)"));
        assert!(lines.contains(&"Popular years: -"));
        assert!(!lines.contains(&"Top patterns:"));
        assert_eq!(
            lines.last(),
            Some(&"Warning: memory is not being saved to disk")
        );
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(5), "5s");
        assert_eq!(format_age(125), "2m");
        assert_eq!(format_age(3_720), "1h2m");
        assert_eq!(format_age(200_000), "2d");
    }
}
