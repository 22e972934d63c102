//! Bounded audit trail of guard decisions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// What a history row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    Open,
    Close,
    Message,
    Ban,
    Unban,
}

/// One guard decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub peer: String,
    pub action: GuardAction,
    pub allowed: bool,
    pub component: String,
    pub detail: String,
}

/// FIFO ring buffer; the oldest row is evicted once full.
#[derive(Debug)]
pub(crate) struct History {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record(&self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The newest `limit` rows (all when `None`), oldest first.
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let entries = self.entries.lock();
        let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(peer: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            peer: peer.to_string(),
            action: GuardAction::Open,
            allowed: true,
            component: "test".to_string(),
            detail: String::new(),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let history = History::new(2);
        history.record(entry("a"));
        history.record(entry("b"));
        history.record(entry("c"));

        let rows = history.snapshot(None);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].peer, "b");
        assert_eq!(rows[1].peer, "c");
    }

    #[test]
    fn test_snapshot_limit_keeps_newest() {
        let history = History::new(10);
        for peer in ["a", "b", "c"] {
            history.record(entry(peer));
        }
        let rows = history.snapshot(Some(2));
        assert_eq!(rows.iter().map(|r| r.peer.as_str()).collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(history.snapshot(Some(0)).len(), 0);
    }
}
