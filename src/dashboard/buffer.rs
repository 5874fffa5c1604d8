use std::collections::VecDeque;

use time::OffsetDateTime;

use super::types::RequestLogEntry;
use crate::utils::clock::parse_timestamp;

/// Bounded FIFO of recently seen requests. Pushing past capacity evicts the oldest entry.
#[derive(Clone, Debug)]
pub struct RequestBuffer {
    entries: VecDeque<RequestLogEntry>,
    capacity: usize,
}

impl RequestBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: RequestLogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<RequestLogEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn find(&self, id: &str) -> Option<RequestLogEntry> {
        self.entries.iter().rev().find(|entry| entry.id == id).cloned()
    }
}

impl Default for RequestBuffer {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_REQUEST_BUFFER_CAPACITY)
    }
}

/// Sorts newest first by parsed timestamp. Entries whose timestamp does not parse keep
/// their relative order after every dated entry.
pub fn sort_newest_first(entries: &mut [RequestLogEntry]) {
    entries.sort_by_cached_key(|entry| {
        std::cmp::Reverse(parse_timestamp(&entry.timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    });
}

/// Merges simulator and gateway-log requests, newest first, dropping duplicate ids and
/// keeping at most `limit` entries.
pub fn merge_recent(
    recorded: Vec<RequestLogEntry>,
    from_logs: Vec<RequestLogEntry>,
    limit: usize,
) -> Vec<RequestLogEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<RequestLogEntry> = recorded
        .into_iter()
        .chain(from_logs)
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect();
    sort_newest_first(&mut merged);
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, timestamp: &str) -> RequestLogEntry {
        RequestLogEntry::new(id, timestamp, 200)
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let mut buffer = RequestBuffer::new(3);
        for i in 0..10 {
            buffer.push(entry(&format!("r{i}"), "2024-05-01T10:00:00Z"));
            assert!(buffer.len() <= 3);
        }
        let ids: Vec<String> = buffer.recent().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["r9", "r8", "r7"]);
        assert!(buffer.find("r0").is_none());
        assert!(buffer.find("r8").is_some());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = RequestBuffer::new(0);
        buffer.push(entry("a", "t"));
        buffer.push(entry("b", "t"));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.recent()[0].id, "b");
    }

    #[test]
    fn merge_sorts_dedups_and_truncates() {
        let recorded = vec![
            entry("sim-1", "2024-05-01T10:00:05Z"),
            entry("dup", "2024-05-01T10:00:01Z"),
        ];
        let logs = vec![
            entry("dup", "2024-05-01T10:00:01Z"),
            entry("log-1", "2024-05-01T10:00:09Z"),
            entry("undated", "not a timestamp"),
        ];
        let merged = merge_recent(recorded, logs, 3);
        let ids: Vec<&str> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["log-1", "sim-1", "dup"]);
    }
}
