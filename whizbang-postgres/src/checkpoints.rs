//! [`CheckpointStore`] against `wh_perspective_checkpoints`, delegating the
//! catching-up/completed bit transition to the `complete_perspective_checkpoint_work`
//! SQL function so the rule lives in exactly one place regardless of which
//! caller (this adapter or `process_work_batch`) reaches it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use whizbang_core::checkpoints::CheckpointStore;
use whizbang_core::ids::{EventId, StreamKey};
use whizbang_core::model::PerspectiveCheckpoint;
use whizbang_core::status::StatusFlags;

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    stream_id: uuid::Uuid,
    projection_name: String,
    last_event_id: Option<uuid::Uuid>,
    status_flags: i16,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl From<CheckpointRow> for PerspectiveCheckpoint {
    fn from(row: CheckpointRow) -> Self {
        PerspectiveCheckpoint {
            stream_id: StreamKey::from_external(row.stream_id),
            projection_name: row.projection_name,
            last_event_id: row.last_event_id.map(EventId::from_external),
            status: StatusFlags::from_bits(row.status_flags as u16),
            processed_at: row.processed_at,
            error: row.error,
        }
    }
}

pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(&self, stream_id: StreamKey, projection_name: &str) -> Option<PerspectiveCheckpoint> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT stream_id, projection_name, last_event_id, status_flags, processed_at, error
             FROM wh_perspective_checkpoints
             WHERE stream_id = $1 AND projection_name = $2",
        )
        .bind(stream_id.as_uuid())
        .bind(projection_name)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|error| {
            warn!(%error, %stream_id, projection_name, "checkpoint lookup failed");
            None
        });

        row.map(Into::into)
    }

    async fn record_completion(
        &self,
        stream_id: StreamKey,
        projection_name: &str,
        last_event_id: EventId,
        status: StatusFlags,
        error: Option<String>,
    ) -> PerspectiveCheckpoint {
        if let Err(db_error) = sqlx::query("SELECT complete_perspective_checkpoint_work($1, $2, $3, $4, $5)")
            .bind(stream_id.as_uuid())
            .bind(projection_name)
            .bind(last_event_id.as_uuid())
            .bind(status.bits() as i16)
            .bind(&error)
            .execute(&self.pool)
            .await
        {
            warn!(%db_error, %stream_id, projection_name, "checkpoint completion write failed");
        }

        self.get(stream_id, projection_name)
            .await
            .unwrap_or_else(|| PerspectiveCheckpoint {
                stream_id,
                projection_name: projection_name.to_string(),
                last_event_id: Some(last_event_id),
                status,
                processed_at: Some(Utc::now()),
                error,
            })
    }
}
