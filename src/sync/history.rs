//! Change history log
//!
//! Per-actor ring buffer of processed batches. Observability only; nothing
//! reads it back into reconciliation.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::types::{HistoryEntry, SyncStatus};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded per-actor batch ledger
pub struct HistoryLog {
    entries: Mutex<HashMap<String, VecDeque<HistoryEntry>>>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest past capacity
    pub fn append(&self, entry: HistoryEntry) {
        let mut entries = self.entries.lock();
        let log = entries.entry(entry.actor_id.clone()).or_default();
        log.push_back(entry);
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    /// Entries for an actor, newest first
    pub fn for_actor(&self, actor_id: &str) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .get(actor_id)
            .map(|log| log.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Aggregate status over the retained entries for an actor
    pub fn status(&self, actor_id: &str) -> SyncStatus {
        let entries = self.entries.lock();
        let Some(log) = entries.get(actor_id) else {
            return SyncStatus::default();
        };

        log.iter().fold(SyncStatus::default(), |mut status, entry| {
            status.last_sync = status.last_sync.max(Some(entry.synced_at));
            status.batch_count += 1;
            status.total_items += entry.item_count;
            status.synced_items += entry.synced_count;
            status.conflict_items += entry.conflict_count;
            status.error_items += entry.error_count;
            status
        })
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(actor: &str, items: usize) -> HistoryEntry {
        HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor.to_string(),
            device_id: "device-1".to_string(),
            synced_at: Utc::now(),
            item_count: items,
            synced_count: items,
            conflict_count: 0,
            error_count: 0,
        }
    }

    #[test]
    fn test_fifo_eviction() {
        let log = HistoryLog::new(3);
        for i in 1..=5 {
            log.append(entry("u1", i));
        }

        let entries = log.for_actor("u1");
        let counts: Vec<_> = entries.iter().map(|e| e.item_count).collect();
        assert_eq!(counts, vec![5, 4, 3]);
    }

    #[test]
    fn test_actors_are_independent() {
        let log = HistoryLog::default();
        log.append(entry("u1", 1));
        log.append(entry("u2", 2));

        assert_eq!(log.for_actor("u1").len(), 1);
        assert_eq!(log.for_actor("u2").len(), 1);
        assert!(log.for_actor("u3").is_empty());
    }

    #[test]
    fn test_status() {
        let log = HistoryLog::default();
        assert_eq!(log.status("u1").batch_count, 0);

        log.append(entry("u1", 2));
        let mut with_conflict = entry("u1", 3);
        with_conflict.synced_count = 1;
        with_conflict.conflict_count = 2;
        log.append(with_conflict);

        let status = log.status("u1");
        assert_eq!(status.batch_count, 2);
        assert_eq!(status.total_items, 5);
        assert_eq!(status.synced_items, 3);
        assert_eq!(status.conflict_items, 2);
        assert!(status.last_sync.is_some());
    }

    #[test]
    fn test_concurrent_appends_respect_bound() {
        let log = std::sync::Arc::new(HistoryLog::new(10));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        log.append(entry("u1", 1));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(log.for_actor("u1").len(), 10);
    }
}
