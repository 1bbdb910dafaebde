//! [`DeduplicationTable`] against `wh_message_deduplication`.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use whizbang_core::dedup::DeduplicationTable;
use whizbang_core::ids::MessageId;

pub struct PgDeduplicationTable {
    pool: PgPool,
}

impl PgDeduplicationTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeduplicationTable for PgDeduplicationTable {
    async fn contains(&self, message_id: MessageId) -> bool {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM wh_message_deduplication WHERE message_id = $1)",
        )
        .bind(message_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .unwrap_or_else(|error| {
            warn!(%error, %message_id, "dedup lookup failed, treating as unseen");
            false
        })
    }

    async fn record_first_seen(&self, message_id: MessageId) {
        if let Err(error) = sqlx::query(
            "INSERT INTO wh_message_deduplication (message_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(message_id.as_uuid())
        .execute(&self.pool)
        .await
        {
            warn!(%error, %message_id, "failed to record dedup entry");
        }
    }
}
