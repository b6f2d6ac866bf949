//! Bounded ring of committed snapshots with an inspection playhead.
//!
//! Execution always appends at the tip; the playhead is a read-only
//! cursor that `seek` and `rewind` move through the retained range. When
//! eviction drops the playhead's scan, the playhead snaps to the oldest
//! retained snapshot.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::debug::TraceEvent;
use crate::error::ApiError;
use crate::state::State;

/// One retained scan: the snapshot plus its labels and, for debug-stepped
/// scans, the rung trace.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Committed snapshot.
    pub state: State,
    /// Labels attached by snapshot breakpoints or manual labeling.
    pub labels: Vec<String>,
    /// Rung trace, retained only for debug-stepped scans.
    pub trace: Option<Arc<[TraceEvent]>>,
}

impl HistoryEntry {
    /// Entry with no labels or trace.
    pub fn new(state: State) -> Self {
        HistoryEntry {
            state,
            labels: Vec::new(),
            trace: None,
        }
    }
}

/// Ordered, bounded ring of committed snapshots keyed by scan id.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
    playhead: u64,
}

impl History {
    /// Empty history retaining at most `limit` snapshots.
    pub fn new(limit: usize) -> Self {
        History {
            entries: VecDeque::new(),
            limit: limit.max(1),
            playhead: 0,
        }
    }

    /// Retention limit.
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Number of retained snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything and seed with a single snapshot.
    pub fn seed(&mut self, entry: HistoryEntry) {
        self.playhead = entry.state.scan_id();
        self.entries.clear();
        self.entries.push_back(entry);
    }

    /// Append at the tip, evicting the oldest entries over the limit and
    /// moving the playhead to the new tip.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.playhead = entry.state.scan_id();
        self.entries.push_back(entry);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    fn index_of(&self, scan_id: u64) -> Option<usize> {
        let idx = self
            .entries
            .partition_point(|e| e.state.scan_id() < scan_id);
        (idx < self.entries.len() && self.entries[idx].state.scan_id() == scan_id)
            .then_some(idx)
    }

    /// Entry of a retained scan.
    pub fn entry(&self, scan_id: u64) -> Result<&HistoryEntry, ApiError> {
        self.index_of(scan_id)
            .map(|i| &self.entries[i])
            .ok_or(ApiError::Evicted(scan_id))
    }

    /// Snapshot of a retained scan.
    pub fn at(&self, scan_id: u64) -> Result<&State, ApiError> {
        self.entry(scan_id).map(|e| &e.state)
    }

    /// Retained snapshots with `a <= scan_id < b`, oldest first.
    pub fn range(&self, a: u64, b: u64) -> Vec<&State> {
        self.entries
            .iter()
            .filter(|e| (a..b).contains(&e.state.scan_id()))
            .map(|e| &e.state)
            .collect()
    }

    /// The last `n` retained snapshots, oldest first.
    pub fn latest(&self, n: usize) -> Vec<&State> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(|e| &e.state).collect()
    }

    /// Oldest retained snapshot carrying the label.
    pub fn find(&self, label: &str) -> Option<&State> {
        self.entries
            .iter()
            .find(|e| e.labels.iter().any(|l| l == label))
            .map(|e| &e.state)
    }

    /// Every retained snapshot carrying the label, oldest first.
    pub fn find_all(&self, label: &str) -> Vec<&State> {
        self.entries
            .iter()
            .filter(|e| e.labels.iter().any(|l| l == label))
            .map(|e| &e.state)
            .collect()
    }

    /// Attach a label to a retained scan.
    pub fn label(&mut self, scan_id: u64, label: impl Into<String>) -> Result<(), ApiError> {
        let idx = self.index_of(scan_id).ok_or(ApiError::Evicted(scan_id))?;
        self.entries[idx].labels.push(label.into());
        Ok(())
    }

    /// Scan id under the playhead. Snaps to the oldest retained scan if
    /// eviction dropped the playhead's entry.
    pub fn playhead(&self) -> u64 {
        if self.index_of(self.playhead).is_some() {
            return self.playhead;
        }
        self.entries
            .front()
            .map(|e| e.state.scan_id())
            .unwrap_or(self.playhead)
    }

    /// Snapshot under the playhead.
    pub fn playhead_state(&self) -> Option<&State> {
        self.at(self.playhead()).ok()
    }

    /// Move the playhead to a retained scan.
    pub fn seek(&mut self, scan_id: u64) -> Result<&State, ApiError> {
        let idx = self.index_of(scan_id).ok_or(ApiError::Evicted(scan_id))?;
        self.playhead = scan_id;
        Ok(&self.entries[idx].state)
    }

    /// Move the playhead to the newest retained scan at least `seconds`
    /// older than the current playhead position.
    pub fn rewind(&mut self, seconds: f64) -> Result<&State, ApiError> {
        let cutoff = self
            .playhead_state()
            .map(|s| s.timestamp() - seconds)
            .ok_or_else(|| ApiError::OutOfRange("history is empty".into()))?;
        let target = self
            .entries
            .iter()
            .rev()
            .find(|e| e.state.timestamp() <= cutoff)
            .map(|e| e.state.scan_id())
            .ok_or_else(|| {
                ApiError::OutOfRange(format!("no retained scan at or before t={cutoff:.6}"))
            })?;
        self.seek(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use im::HashMap;

    fn state(scan_id: u64, timestamp: f64) -> State {
        State::new(scan_id, timestamp, HashMap::new(), HashMap::new())
    }

    fn history_with(n: u64, limit: usize) -> History {
        let mut h = History::new(limit);
        h.seed(HistoryEntry::new(state(0, 0.0)));
        for i in 1..=n {
            h.push(HistoryEntry::new(state(i, i as f64 * 0.1)));
        }
        h
    }

    #[test]
    fn eviction_keeps_the_newest() {
        let h = history_with(10, 4);
        assert_eq!(h.len(), 4);
        assert!(h.at(6).is_err());
        assert_eq!(h.at(7).unwrap().scan_id(), 7);
        assert_eq!(h.at(10).unwrap().scan_id(), 10);
    }

    #[test]
    fn range_and_latest_are_oldest_first() {
        let h = history_with(5, 100);
        let ids: Vec<_> = h.range(1, 4).iter().map(|s| s.scan_id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let ids: Vec<_> = h.latest(2).iter().map(|s| s.scan_id()).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn playhead_follows_tip_and_survives_eviction() {
        let mut h = history_with(3, 100);
        assert_eq!(h.playhead(), 3);
        h.seek(1).unwrap();
        assert_eq!(h.playhead(), 1);
        // push until scan 1 is evicted
        let mut h2 = history_with(3, 3);
        h2.seek(1).unwrap();
        h2.push(HistoryEntry::new(state(4, 0.4)));
        // 1 was evicted; playhead snaps to oldest retained
        assert_eq!(h2.playhead(), 2);
    }

    #[test]
    fn rewind_lands_on_newest_older_scan() {
        let mut h = history_with(10, 100);
        let s = h.rewind(0.35).unwrap();
        // playhead at t=1.0; cutoff 0.65 -> scan 6 at t=0.6
        assert_eq!(s.scan_id(), 6);
        assert!(h.rewind(100.0).is_err());
    }

    #[test]
    fn labels_find_oldest_first() {
        let mut h = history_with(5, 100);
        h.label(2, "mark").unwrap();
        h.label(4, "mark").unwrap();
        assert_eq!(h.find("mark").unwrap().scan_id(), 2);
        let ids: Vec<_> = h.find_all("mark").iter().map(|s| s.scan_id()).collect();
        assert_eq!(ids, vec![2, 4]);
        assert!(h.label(99, "mark").is_err());
    }
}
