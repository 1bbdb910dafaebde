//! [`EventStore`] against `wh_event_store`. Version conflicts are caught via
//! the table's `(stream_id, version)` unique constraint and retried with the
//! same backoff schedule the in-memory adapter uses.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::PgPool;

use whizbang_core::error::EventStoreError;
use whizbang_core::event_store::EventStore;
use whizbang_core::ids::{EventId, StreamKey};
use whizbang_core::model::EventStoreRecord;

const MAX_APPEND_RETRIES: u32 = 8;

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: uuid::Uuid,
    stream_id: uuid::Uuid,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    event_data: Json,
    metadata: Json,
    scope: Option<Json>,
    sequence_number: i64,
    version: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<EventRow> for EventStoreRecord {
    fn from(row: EventRow) -> Self {
        EventStoreRecord {
            event_id: EventId::from_external(row.event_id),
            stream_id: StreamKey::from_external(row.stream_id),
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            event_data: row.event_data,
            metadata: row.metadata,
            scope: row.scope,
            sequence_number: row.sequence_number as u64,
            version: row.version as u64,
            created_at: row.created_at,
        }
    }
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
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
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::Storage(e.to_string()))?;

            let next_version: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(version) + 1, 0) FROM wh_event_store WHERE stream_id = $1",
            )
            .bind(stream_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventStoreError::Storage(e.to_string()))?;

            let sequence_number: i64 = sqlx::query_scalar("SELECT next_sequence('event_store_sequence')")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| EventStoreError::Storage(e.to_string()))?;

            let event_id = uuid::Uuid::now_v7();
            let result = sqlx::query(
                r#"
                INSERT INTO wh_event_store (
                    event_id, stream_id, aggregate_id, aggregate_type, event_type,
                    event_data, metadata, scope, sequence_number, version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(event_id)
            .bind(stream_id.as_uuid())
            .bind(&aggregate_id)
            .bind(&aggregate_type)
            .bind(&event_type)
            .bind(&event_data)
            .bind(&metadata)
            .bind(&scope)
            .bind(sequence_number)
            .bind(next_version)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {
                    tx.commit().await.map_err(|e| EventStoreError::Storage(e.to_string()))?;
                    return Ok(EventStoreRecord {
                        event_id: EventId::from_external(event_id),
                        stream_id,
                        aggregate_id,
                        aggregate_type,
                        event_type,
                        event_data,
                        metadata,
                        scope,
                        sequence_number: sequence_number as u64,
                        version: next_version as u64,
                        created_at: chrono::Utc::now(),
                    });
                }
                Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                    tx.rollback().await.ok();
                    attempt += 1;
                    if attempt >= MAX_APPEND_RETRIES {
                        return Err(EventStoreError::RetriesExhausted {
                            stream_id: stream_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(2u64.pow(attempt.min(6)))).await;
                    continue;
                }
                Err(error) => return Err(EventStoreError::Storage(error.to_string())),
            }
        }
    }

    async fn read_from_sequence(
        &self,
        stream_id: StreamKey,
        from_sequence: u64,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT event_id, stream_id, aggregate_id, aggregate_type, event_type, event_data,
                    metadata, scope, sequence_number, version, created_at
             FROM wh_event_store
             WHERE stream_id = $1 AND sequence_number >= $2
             ORDER BY version",
        )
        .bind(stream_id.as_uuid())
        .bind(from_sequence as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn read_from_event_id(
        &self,
        stream_id: StreamKey,
        from_event_id: EventId,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT event_id, stream_id, aggregate_id, aggregate_type, event_type, event_data,
                    metadata, scope, sequence_number, version, created_at
             FROM wh_event_store
             WHERE stream_id = $1 AND event_id >= $2
             ORDER BY version",
        )
        .bind(stream_id.as_uuid())
        .bind(from_event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn read_polymorphic(
        &self,
        stream_id: StreamKey,
        from_event_id: EventId,
        event_types: &[String],
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT event_id, stream_id, aggregate_id, aggregate_type, event_type, event_data,
                    metadata, scope, sequence_number, version, created_at
             FROM wh_event_store
             WHERE stream_id = $1 AND event_id >= $2 AND event_type = ANY($3)
             ORDER BY version",
        )
        .bind(stream_id.as_uuid())
        .bind(from_event_id.as_uuid())
        .bind(event_types)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_events_between(
        &self,
        stream_id: StreamKey,
        after_event_id: EventId,
        up_to_event_id: EventId,
    ) -> Result<Vec<EventStoreRecord>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT event_id, stream_id, aggregate_id, aggregate_type, event_type, event_data,
                    metadata, scope, sequence_number, version, created_at
             FROM wh_event_store
             WHERE stream_id = $1 AND event_id > $2 AND event_id <= $3
             ORDER BY version",
        )
        .bind(stream_id.as_uuid())
        .bind(after_event_id.as_uuid())
        .bind(up_to_event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises only the pure row-mapping path; anything touching the pool
    /// lives in `tests/` behind `DATABASE_URL`.
    #[test]
    fn event_row_maps_sequence_and_version_as_unsigned() {
        let row = EventRow {
            event_id: uuid::Uuid::now_v7(),
            stream_id: uuid::Uuid::now_v7(),
            aggregate_id: "agg".into(),
            aggregate_type: "Thing".into(),
            event_type: "Created".into(),
            event_data: Json::Null,
            metadata: Json::Null,
            scope: None,
            sequence_number: 7,
            version: 3,
            created_at: chrono::Utc::now(),
        };
        let record: EventStoreRecord = row.into();
        assert_eq!(record.sequence_number, 7);
        assert_eq!(record.version, 3);
    }
}
