//! The outbox contract and an in-memory reference adapter.
//!
//! The production path never calls these directly — it goes through the
//! Work Coordinator. This trait exists for tests and for out-of-coordinator
//! use cases such as a synchronous command handler that needs a dedup check
//! before work is persisted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::BufferError;
use crate::ids::MessageId;
use crate::model::OutboxRecord;

#[async_trait]
pub trait Outbox: Send + Sync {
    /// Inserts a new record with `status = Pending`. Returns
    /// [`BufferError::Duplicate`] if `message_id` has already been appended.
    async fn append(&self, record: OutboxRecord) -> Result<(), BufferError>;

    /// True if `message_id` has already been appended to this outbox.
    async fn has_processed(&self, message_id: MessageId) -> Result<bool, BufferError>;

    /// Marks a record published/completed.
    async fn mark_processed(&self, message_id: MessageId) -> Result<(), BufferError>;

    /// Deletes rows completed or terminally failed longer than `retention`
    /// ago. Returns the number of rows removed.
    async fn cleanup_expired(&self, retention: Duration) -> Result<u64, BufferError>;
}

pub struct InMemoryOutbox {
    records: RwLock<HashMap<MessageId, OutboxRecord>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn append(&self, record: OutboxRecord) -> Result<(), BufferError> {
        let mut records = self.records.write();
        if records.contains_key(&record.message_id) {
            return Err(BufferError::Duplicate(record.message_id.to_string()));
        }
        records.insert(record.message_id, record);
        Ok(())
    }

    async fn has_processed(&self, message_id: MessageId) -> Result<bool, BufferError> {
        Ok(self
            .records
            .read()
            .get(&message_id)
            .map(|record| record.status_flags.contains(crate::status::StatusFlags::COMPLETED))
            .unwrap_or(false))
    }

    async fn mark_processed(&self, message_id: MessageId) -> Result<(), BufferError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&message_id)
            .ok_or_else(|| BufferError::NotFound(message_id.to_string()))?;
        record.status_flags.mark_completed();
        record.published_at = Some(Utc::now());
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
    use serde_json::Value as Json;

    fn record(message_id: MessageId) -> OutboxRecord {
        OutboxRecord::new_pending(message_id, "dest", "TestMessage", Json::Null, Utc::now())
    }

    #[tokio::test]
    async fn append_then_duplicate_append_is_rejected() {
        let outbox = InMemoryOutbox::new();
        let message_id = MessageId::generate();
        outbox.append(record(message_id)).await.unwrap();

        let result = outbox.append(record(message_id)).await;
        assert!(matches!(result, Err(BufferError::Duplicate(_))));
    }

    #[tokio::test]
    async fn mark_processed_sets_completed() {
        let outbox = InMemoryOutbox::new();
        let message_id = MessageId::generate();
        outbox.append(record(message_id)).await.unwrap();

        assert!(!outbox.has_processed(message_id).await.unwrap());
        outbox.mark_processed(message_id).await.unwrap();
        assert!(outbox.has_processed(message_id).await.unwrap());
    }
}
