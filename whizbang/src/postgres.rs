//! Postgres bootstrap (C14): connects a pool, runs migrations, and starts a
//! worker loop backed by [`PgWorkCoordinator`] behind a [`BatchedStrategy`].
//!
//! Application code supplies only the pieces that are genuinely
//! deployment-specific — its dispatcher, execution strategy and transport —
//! and gets back a [`Runtime`] it can shut down gracefully.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use whizbang_core::config::Config;
use whizbang_core::coordinator::{BatchedStrategy, CoordinatorStrategy, Topology};
use whizbang_core::dispatcher::Dispatcher;
use whizbang_core::envelope::ServiceInstanceRef;
use whizbang_core::execution::ExecutionStrategy;
use whizbang_core::ids::InstanceId;
use whizbang_core::worker_loop::{Transport, WorkerLoop};
use whizbang_postgres::PgWorkCoordinator;

use crate::Runtime;

/// The deployment-specific collaborators [`connect`] wires into a
/// [`WorkerLoop`]. Everything else (the coordinator, its flush strategy, the
/// pool) is assembled from `database_url` and `config`.
pub struct Deployment<T> {
    pub service_name: String,
    pub instance_id: InstanceId,
    pub host: String,
    pub dispatcher: Arc<Dispatcher<T>>,
    pub executor: Arc<dyn ExecutionStrategy>,
    pub transport: Arc<dyn Transport>,
}

/// Connects to Postgres, runs pending migrations, and starts the worker
/// loop. Returns the pool alongside the runtime so callers that also want
/// direct access to the other `whizbang-postgres` adapters (event store,
/// outbox, inbox, ...) don't have to open a second connection.
pub async fn connect<T>(
    database_url: &str,
    config: &Config,
    deployment: Deployment<T>,
) -> Result<(Runtime<T>, PgPool), sqlx::Error>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let pool = PgPoolOptions::new().connect(database_url).await?;
    whizbang_postgres::migrate(&pool)
        .await
        .map_err(|error| sqlx::Error::Configuration(error.to_string().into()))?;

    let coordinator = Arc::new(PgWorkCoordinator::new(pool.clone()));
    let topology = Topology {
        partition_count: config.partition_count,
        lease_seconds: config.lease_seconds,
        stale_threshold_seconds: config.stale_threshold_seconds,
        max_delivery_attempts: config.max_delivery_attempts,
    };

    let strategy: Arc<dyn CoordinatorStrategy> = BatchedStrategy::new(
        coordinator,
        deployment.instance_id,
        deployment.service_name.clone(),
        deployment.host.clone(),
        topology,
        config.batch_flush_interval,
        config.batch_flush_size,
    );

    let service_instance = ServiceInstanceRef {
        service_name: deployment.service_name,
        instance_id: deployment.instance_id.to_string(),
        host: deployment.host,
        pid: std::process::id(),
    };

    let worker_loop = Arc::new(WorkerLoop::new(
        strategy,
        deployment.dispatcher,
        deployment.executor,
        deployment.transport,
        service_instance,
        config.poll_interval,
    ));

    Ok((Runtime::spawn(worker_loop), pool))
}
