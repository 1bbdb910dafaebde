//! [`WorkCoordinator`] backed by the `process_work_batch` SQL function in
//! `migrations/0001_init.sql`. The whole algorithm in §4.1 runs inside that
//! single function call, so this adapter is a thin jsonb-in/jsonb-out shim:
//! no transaction handling here, because the function body is already one
//! statement and Postgres wraps it in an implicit transaction.

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::PgPool;

use whizbang_core::coordinator::{ProcessWorkBatchRequest, WorkBatch, WorkCoordinator};
use whizbang_core::error::CoordinatorError;

pub struct PgWorkCoordinator {
    pool: PgPool,
}

impl PgWorkCoordinator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkCoordinator for PgWorkCoordinator {
    #[tracing::instrument(skip(self, request), fields(instance_id = %request.instance_id, service = %request.service_name))]
    async fn process_work_batch(
        &self,
        request: ProcessWorkBatchRequest,
    ) -> Result<WorkBatch, CoordinatorError> {
        let payload = serde_json::to_value(&request)
            .map_err(|error| CoordinatorError::Transaction(error.to_string()))?;

        let response: Json = sqlx::query_scalar("SELECT process_work_batch($1)")
            .bind(&payload)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        serde_json::from_value(response).map_err(|error| CoordinatorError::Transaction(error.to_string()))
    }
}

fn map_sqlx_error(error: sqlx::Error) -> CoordinatorError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            CoordinatorError::Aborted(error.to_string())
        }
        sqlx::Error::PoolTimedOut => CoordinatorError::Aborted(error.to_string()),
        _ => CoordinatorError::Transaction(error.to_string()),
    }
}
