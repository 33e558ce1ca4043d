//! Message deduplication. The platform redelivers callbacks when the ack is
//! slow, so every message id is checked against a bounded, insertion-ordered
//! seen-set before dispatch.

use indexmap::IndexSet;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_TRIM_TO: usize = 800;

pub struct Deduplicator {
    seen: Mutex<IndexSet<String>>,
    capacity: usize,
    trim_to: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_TRIM_TO)
    }

    pub fn with_capacity(capacity: usize, trim_to: usize) -> Self {
        debug_assert!(trim_to <= capacity);
        Self {
            seen: Mutex::new(IndexSet::new()),
            capacity,
            trim_to,
        }
    }

    /// Returns true on first sighting and records the id; false for a
    /// redelivery. Empty ids (events without a MsgId) are never deduplicated.
    pub async fn check_and_mark(&self, msg_id: &str) -> bool {
        if msg_id.is_empty() {
            return true;
        }
        let mut seen = self.seen.lock().await;
        if seen.contains(msg_id) {
            return false;
        }
        seen.insert(msg_id.to_string());
        if seen.len() > self.capacity {
            let drain = seen.len() - self.trim_to;
            seen.drain(..drain);
            debug!("dedup: trimmed {} oldest message ids", drain);
        }
        true
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_sighting_then_duplicate() {
        let dedup = Deduplicator::new();
        assert!(dedup.check_and_mark("msg-1").await);
        assert!(!dedup.check_and_mark("msg-1").await);
        assert!(dedup.check_and_mark("msg-2").await);
    }

    #[tokio::test]
    async fn empty_ids_are_never_duplicates() {
        let dedup = Deduplicator::new();
        assert!(dedup.check_and_mark("").await);
        assert!(dedup.check_and_mark("").await);
    }

    #[tokio::test]
    async fn trims_oldest_past_capacity() {
        let dedup = Deduplicator::with_capacity(10, 8);
        for i in 0..11 {
            assert!(dedup.check_and_mark(&format!("msg-{i}")).await);
        }
        // Trim dropped msg-0..=msg-2; the oldest ids are forgotten and the
        // newest survive.
        assert_eq!(dedup.seen.lock().await.len(), 8);
        assert!(dedup.check_and_mark("msg-0").await);
        assert!(!dedup.check_and_mark("msg-10").await);
    }
}
