//! The append-only event log contract and an in-memory reference adapter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value as Json;

use crate::error::EventStoreError;
use crate::ids::{EventId, StreamKey};
use crate::model::EventStoreRecord;

/// Maximum number of optimistic-concurrency retries `InMemoryEventStore`
/// performs before surfacing [`EventStoreError::RetriesExhausted`]. Durable
/// adapters may choose a different bound; this one only needs to be large
/// enough that contention in tests resolves well before it's hit.
const MAX_APPEND_RETRIES: u32 = 8;

/// Append-only per-stream log with monotonic version/sequence and
/// optimistic concurrency on `(stream_id, version)`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event to `stream_id`, assigning the next `version` and
    /// the next global `sequence_number`. Retries internally on a
    /// version collision up to an implementation-defined bound.
    async fn append(
        &self,
        stream_id: StreamKey,
        aggregate_id: String,
        aggregate_type: String,
        event_type: String,
        event_data: Json,
        metadata: Json,
        scope: Option<Json>,
    ) -> Result<EventStoreRecord, EventStoreError>;

    /// All events for `stream_id` with `sequence_number >= from_sequence`,
    /// in version order.
    async fn read_from_sequence(
        &self,
        stream_id: StreamKey,
        from_sequence: u64,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError>;

    /// All events for `stream_id` with `event_id >= from_event_id` (by the
    /// id's own chronological ordering), in version order.
    async fn read_from_event_id(
        &self,
        stream_id: StreamKey,
        from_event_id: EventId,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError>;

    /// Like [`EventStore::read_from_event_id`], restricted to the given
    /// `event_type` values; used by projection catch-up to materialize only
    /// the types it understands.
    async fn read_polymorphic(
        &self,
        stream_id: StreamKey,
        from_event_id: EventId,
        event_types: &[String],
    ) -> Result<Vec<EventStoreRecord>, EventStoreError>;

    /// Half-open range `(after_event_id, up_to_event_id]`, in version order.
    async fn get_events_between(
        &self,
        stream_id: StreamKey,
        after_event_id: EventId,
        up_to_event_id: EventId,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError>;
}

#[derive(Default)]
struct StreamState {
    records: Vec<EventStoreRecord>,
}

/// Reference adapter backing tests and the facade crate's default wiring.
/// Durable deployments use `whizbang-postgres`'s adapter instead, which
/// implements the same contract against `wh_event_store`.
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, StreamState>>,
    global_sequence: std::sync::atomic::AtomicU64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            global_sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.global_sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: StreamKey,
        aggregate_id: String,
        aggregate_type: String,
        event_type: String,
        event_data: Json,
        metadata: Json,
        scope: Option<Json>,
    ) -> Result<EventStoreRecord, EventStoreError> {
        let mut attempt = 0;
        loop {
            let sequence_number = self.next_sequence();
            let mut streams = self.streams.write();
            let state = streams.entry(stream_id).or_default();
            let next_version = state
                .records
                .last()
                .map(|record| record.version + 1)
                .unwrap_or(0);

            let collided = state.records.iter().any(|r| r.version == next_version);
            if collided {
                attempt += 1;
                if attempt >= MAX_APPEND_RETRIES {
                    return Err(EventStoreError::RetriesExhausted {
                        stream_id: stream_id.to_string(),
                        attempts: attempt,
                    });
                }
                drop(streams);
                tokio::time::sleep(Duration::from_millis(2u64.pow(attempt.min(6)))).await;
                continue;
            }

            let record = EventStoreRecord {
                event_id: EventId::generate(),
                stream_id,
                aggregate_id,
                aggregate_type,
                event_type,
                event_data,
                metadata,
                scope,
                sequence_number,
                version: next_version,
                created_at: Utc::now(),
            };
            state.records.push(record.clone());
            return Ok(record);
        }
    }

    async fn read_from_sequence(
        &self,
        stream_id: StreamKey,
        from_sequence: u64,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let streams = self.streams.read();
        let Some(state) = streams.get(&stream_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .records
            .iter()
            .filter(|record| record.sequence_number >= from_sequence)
            .cloned()
            .collect())
    }

    async fn read_from_event_id(
        &self,
        stream_id: StreamKey,
        from_event_id: EventId,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let streams = self.streams.read();
        let Some(state) = streams.get(&stream_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .records
            .iter()
            .filter(|record| record.event_id >= from_event_id)
            .cloned()
            .collect())
    }

    async fn read_polymorphic(
        &self,
        stream_id: StreamKey,
        from_event_id: EventId,
        event_types: &[String],
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let records = self.read_from_event_id(stream_id, from_event_id).await?;
        Ok(records
            .into_iter()
            .filter(|record| event_types.iter().any(|t| t == &record.event_type))
            .collect())
    }

    async fn get_events_between(
        &self,
        stream_id: StreamKey,
        after_event_id: EventId,
        up_to_event_id: EventId,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let streams = self.streams.read();
        let Some(state) = streams.get(&stream_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .records
            .iter()
            .filter(|record| record.event_id > after_event_id && record.event_id <= up_to_event_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_read_returns_in_order() {
        let store = InMemoryEventStore::new();
        let stream_id = StreamKey::generate();

        let e1 = store
            .append(
                stream_id,
                "agg-1".into(),
                "Account".into(),
                "Opened".into(),
                Json::Null,
                Json::Null,
                None,
            )
            .await
            .unwrap();
        let e2 = store
            .append(
                stream_id,
                "agg-1".into(),
                "Account".into(),
                "Credited".into(),
                Json::Null,
                Json::Null,
                None,
            )
            .await
            .unwrap();

        assert_eq!(e1.version, 0);
        assert_eq!(e2.version, 1);

        let records = store.read_from_sequence(stream_id, 0).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_id, e1.event_id);
        assert_eq!(records[1].event_id, e2.event_id);
    }

    #[tokio::test]
    async fn concurrent_appends_to_the_same_stream_both_succeed_with_distinct_versions() {
        let store = std::sync::Arc::new(InMemoryEventStore::new());
        let stream_id = StreamKey::generate();

        let store_a = store.clone();
        let store_b = store.clone();
        let a = tokio::spawn(async move {
            store_a
                .append(
                    stream_id,
                    "agg".into(),
                    "Thing".into(),
                    "A".into(),
                    Json::Null,
                    Json::Null,
                    None,
                )
                .await
        });
        let b = tokio::spawn(async move {
            store_b
                .append(
                    stream_id,
                    "agg".into(),
                    "Thing".into(),
                    "B".into(),
                    Json::Null,
                    Json::Null,
                    None,
                )
                .await
        });

        let (ra, rb) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_ne!(ra.version, rb.version);

        let records = store.read_from_sequence(stream_id, 0).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn reading_an_unknown_stream_is_empty_not_an_error() {
        let store = InMemoryEventStore::new();
        let records = store
            .read_from_sequence(StreamKey::generate(), 0)
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
