//! Process lifecycle: a running [`WorkerLoop`] plus graceful shutdown.
//!
//! Grounded on `spark-hosting`'s `GracefulShutdownCoordinator` (trigger,
//! await with a timeout, force-close a straggler) but built on
//! [`CancellationToken`] and [`tokio::time::timeout`] rather than a
//! hand-rolled `Future` racer, since [`WorkerLoop`] already exposes a
//! cancellation token of its own.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use whizbang_core::worker_loop::WorkerLoop;

/// A spawned worker loop, held so callers can shut it down in bounded time
/// without reaching back into whatever wired it together.
pub struct Runtime<T> {
    worker_loop: Arc<WorkerLoop<T>>,
    handle: JoinHandle<()>,
}

impl<T> Runtime<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Spawns `worker_loop`'s polling task.
    pub fn spawn(worker_loop: Arc<WorkerLoop<T>>) -> Self {
        let handle = worker_loop.clone().spawn();
        Self { worker_loop, handle }
    }

    /// The token that cancels this loop. Wire it into a signal handler or
    /// another component's own shutdown path to cancel them together.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.worker_loop.cancellation_token()
    }

    /// Cancels the loop and waits up to `grace` for its in-flight tick to
    /// finish. A straggler past the deadline is aborted rather than awaited
    /// forever, matching the donor coordinator's force-close-on-timeout
    /// behavior.
    pub async fn shutdown(self, grace: Duration) {
        self.worker_loop.cancel();
        let abort_handle = self.handle.abort_handle();
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "worker loop did not stop within the grace period, aborting"
            );
            abort_handle.abort();
        }
    }

    /// Waits for the loop to exit on its own, e.g. because something else
    /// holding [`Runtime::cancellation_token`] cancelled it.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use whizbang_core::checkpoints::InMemoryCheckpointStore;
    use whizbang_core::coordinator::{BatchedStrategy, InMemoryWorkCoordinator, Topology};
    use whizbang_core::dedup::InMemoryDeduplicationTable;
    use whizbang_core::dispatcher::{Dispatcher, HandlerRegistry};
    use whizbang_core::envelope::ServiceInstanceRef;
    use whizbang_core::error::ProcessingFailure;
    use whizbang_core::execution::SerialExecutor;
    use whizbang_core::ids::InstanceId;
    use whizbang_core::worker_loop::Transport;

    fn instance() -> ServiceInstanceRef {
        ServiceInstanceRef {
            service_name: "svc".into(),
            instance_id: "i-1".into(),
            host: "localhost".into(),
            pid: 1,
        }
    }

    fn topology() -> Topology {
        Topology {
            partition_count: 16,
            lease_seconds: 300,
            stale_threshold_seconds: 600,
            max_delivery_attempts: 5,
        }
    }

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn publish(&self, _work: &whizbang_core::coordinator::OutboxWork) -> Result<(), ProcessingFailure> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_within_the_grace_period() {
        let coordinator = Arc::new(InMemoryWorkCoordinator::new(
            Arc::new(InMemoryDeduplicationTable::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        ));
        let strategy = BatchedStrategy::new(
            coordinator,
            InstanceId::generate(),
            "svc",
            "localhost",
            topology(),
            StdDuration::from_secs(3600),
            1000,
        );
        let registry: Arc<HandlerRegistry<String>> = Arc::new(HandlerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry, instance()));
        let executor: Arc<dyn whizbang_core::execution::ExecutionStrategy> = Arc::new(SerialExecutor::new(None));
        executor.start().await.unwrap();

        let worker_loop = Arc::new(WorkerLoop::new(
            strategy,
            dispatcher,
            executor,
            Arc::new(NullTransport),
            instance(),
            StdDuration::from_millis(5),
        ));

        let runtime = Runtime::spawn(worker_loop);
        runtime.shutdown(StdDuration::from_secs(1)).await;
    }
}
