//! The inbox contract and an in-memory reference adapter. Same shape as the
//! outbox plus a `handler_name` and dedup against the permanent
//! deduplication table (see [`crate::dedup`]).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::dedup::DeduplicationTable;
use crate::error::BufferError;
use crate::ids::MessageId;
use crate::model::InboxRecord;

#[async_trait]
pub trait Inbox: Send + Sync {
    async fn append(&self, record: InboxRecord) -> Result<(), BufferError>;

    /// Dedup check against this inbox and the permanent dedup table.
    async fn has_processed(&self, message_id: MessageId) -> Result<bool, BufferError>;

    async fn mark_processed(&self, message_id: MessageId, handler_name: &str) -> Result<(), BufferError>;

    async fn cleanup_expired(&self, retention: Duration) -> Result<u64, BufferError>;
}

pub struct InMemoryInbox {
    records: RwLock<HashMap<MessageId, InboxRecord>>,
    dedup: std::sync::Arc<dyn DeduplicationTable>,
}

impl InMemoryInbox {
    pub fn new(dedup: std::sync::Arc<dyn DeduplicationTable>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dedup,
        }
    }
}

#[async_trait]
impl Inbox for InMemoryInbox {
    async fn append(&self, record: InboxRecord) -> Result<(), BufferError> {
        if self.dedup.contains(record.message_id).await {
            return Err(BufferError::Duplicate(record.message_id.to_string()));
        }
        self.dedup.record_first_seen(record.message_id).await;
        self.records.write().insert(record.message_id, record);
        Ok(())
    }

    async fn has_processed(&self, message_id: MessageId) -> Result<bool, BufferError> {
        if self.dedup.contains(message_id).await {
            return Ok(true);
        }
        Ok(self
            .records
            .read()
            .get(&message_id)
            .map(|record| record.status_flags.contains(crate::status::StatusFlags::COMPLETED))
            .unwrap_or(false))
    }

    async fn mark_processed(&self, message_id: MessageId, handler_name: &str) -> Result<(), BufferError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&message_id)
            .ok_or_else(|| BufferError::NotFound(message_id.to_string()))?;
        record.status_flags.mark_completed();
        record.handler_name = Some(handler_name.to_string());
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn cleanup_expired(&self, retention: Duration) -> Result<u64, BufferError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).map_err(|e| BufferError::Storage(e.to_string()))?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| {
            let done = record.status_flags.contains(crate::status::StatusFlags::COMPLETED)
                || record.status_flags.contains(crate::status::StatusFlags::TERMINAL_FAILURE);
            !(done && record.created_at < cutoff)
        });
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryDeduplicationTable;
    use serde_json::Value as Json;

    fn record(message_id: MessageId) -> InboxRecord {
        InboxRecord::new_pending(message_id, "dest", "TestMessage", Json::Null, Utc::now())
    }

    #[tokio::test]
    async fn append_is_deduplicated_against_the_permanent_table() {
        let dedup = std::sync::Arc::new(InMemoryDeduplicationTable::new());
        let inbox = InMemoryInbox::new(dedup);
        let message_id = MessageId::generate();

        inbox.append(record(message_id)).await.unwrap();
        let result = inbox.append(record(message_id)).await;
        assert!(matches!(result, Err(BufferError::Duplicate(_))));
    }

    #[tokio::test]
    async fn mark_processed_records_handler_name() {
        let dedup = std::sync::Arc::new(InMemoryDeduplicationTable::new());
        let inbox = InMemoryInbox::new(dedup);
        let message_id = MessageId::generate();
        inbox.append(record(message_id)).await.unwrap();

        inbox.mark_processed(message_id, "OrderHandler").await.unwrap();
        assert!(inbox.has_processed(message_id).await.unwrap());
    }
}
