//! The permanent first-seen table used for idempotent delivery.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::ids::MessageId;
use crate::model::DeduplicationRecord;

#[async_trait]
pub trait DeduplicationTable: Send + Sync {
    /// True if `message_id` has ever been recorded.
    async fn contains(&self, message_id: MessageId) -> bool;

    /// Records `message_id` as first-seen now. A no-op if already recorded.
    async fn record_first_seen(&self, message_id: MessageId);
}

pub struct InMemoryDeduplicationTable {
    seen: RwLock<HashSet<MessageId>>,
}

impl InMemoryDeduplicationTable {
    pub fn new() -> Self {
        Self {
            seen: RwLock::new(HashSet::new()),
        }
    }

    pub fn record(&self, message_id: MessageId) -> DeduplicationRecord {
        DeduplicationRecord {
            message_id,
            first_seen_at: Utc::now(),
        }
    }
}

impl Default for InMemoryDeduplicationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeduplicationTable for InMemoryDeduplicationTable {
    async fn contains(&self, message_id: MessageId) -> bool {
        self.seen.read().contains(&message_id)
    }

    async fn record_first_seen(&self, message_id: MessageId) {
        self.seen.write().insert(message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_twice_is_idempotent() {
        let table = InMemoryDeduplicationTable::new();
        let message_id = MessageId::generate();

        assert!(!table.contains(message_id).await);
        table.record_first_seen(message_id).await;
        table.record_first_seen(message_id).await;
        assert!(table.contains(message_id).await);
    }
}
