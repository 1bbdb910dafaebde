//! [`Outbox`] against `wh_outbox`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::PgPool;

use whizbang_core::error::BufferError;
use whizbang_core::ids::{MessageId, StreamKey};
use whizbang_core::model::OutboxRecord;
use whizbang_core::status::{FailureReason, StatusFlags};

#[derive(sqlx::FromRow)]
struct OutboxRow {
    message_id: uuid::Uuid,
    destination: String,
    message_type: String,
    message_data: Json,
    metadata: Json,
    scope: Option<Json>,
    stream_id: Option<uuid::Uuid>,
    partition_number: Option<i32>,
    is_event: bool,
    status_flags: i16,
    attempts: i32,
    error: Option<String>,
    instance_id: Option<String>,
    lease_expiry: Option<DateTime<Utc>>,
    failure_reason: i16,
    scheduled_for: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            message_id: MessageId::from_external(row.message_id),
            destination: row.destination,
            message_type: row.message_type,
            message_data: row.message_data,
            metadata: row.metadata,
            scope: row.scope,
            stream_id: row.stream_id.map(StreamKey::from_external),
            partition_number: row.partition_number.map(|n| n as u32),
            is_event: row.is_event,
            status_flags: StatusFlags::from_bits(row.status_flags as u16),
            attempts: row.attempts as u32,
            error: row.error,
            instance_id: row.instance_id,
            lease_expiry: row.lease_expiry,
            failure_reason: FailureReason::from_code(row.failure_reason as u8),
            scheduled_for: row.scheduled_for,
            created_at: row.created_at,
            published_at: row.published_at,
            processed_at: row.processed_at,
        }
    }
}

pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl whizbang_core::outbox::Outbox for PgOutbox {
    async fn append(&self, record: OutboxRecord) -> Result<(), BufferError> {
        let result = sqlx::query(
            r#"
            INSERT INTO wh_outbox (
                message_id, destination, message_type, message_data, metadata, scope,
                stream_id, partition_number, is_event, status_flags, attempts, error,
                instance_id, lease_expiry, failure_reason, scheduled_for, created_at,
                published_at, processed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(record.message_id.as_uuid())
        .bind(&record.destination)
        .bind(&record.message_type)
        .bind(&record.message_data)
        .bind(&record.metadata)
        .bind(&record.scope)
        .bind(record.stream_id.map(|id| id.as_uuid()))
        .bind(record.partition_number.map(|n| n as i32))
        .bind(record.is_event)
        .bind(record.status_flags.bits() as i16)
        .bind(record.attempts as i32)
        .bind(&record.error)
        .bind(&record.instance_id)
        .bind(record.lease_expiry)
        .bind(record.failure_reason.code() as i16)
        .bind(record.scheduled_for)
        .bind(record.created_at)
        .bind(record.published_at)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(BufferError::Duplicate(record.message_id.to_string()))
            }
            Err(error) => Err(BufferError::Storage(error.to_string())),
        }
    }

    async fn has_processed(&self, message_id: MessageId) -> Result<bool, BufferError> {
        let flags: Option<i16> = sqlx::query_scalar("SELECT status_flags FROM wh_outbox WHERE message_id = $1")
            .bind(message_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BufferError::Storage(e.to_string()))?;

        Ok(flags
            .map(|bits| StatusFlags::from_bits(bits as u16).contains(StatusFlags::COMPLETED))
            .unwrap_or(false))
    }

    async fn mark_processed(&self, message_id: MessageId) -> Result<(), BufferError> {
        let result = sqlx::query(
            "UPDATE wh_outbox SET status_flags = status_flags | 4, published_at = now(), processed_at = now()
             WHERE message_id = $1",
        )
        .bind(message_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| BufferError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(BufferError::NotFound(message_id.to_string()));
        }
        Ok(())
    }

    async fn cleanup_expired(&self, retention: Duration) -> Result<u64, BufferError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).map_err(|e| BufferError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "DELETE FROM wh_outbox
             WHERE (status_flags & 32772) <> 0 AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| BufferError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
