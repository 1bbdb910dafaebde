//! The per-instance polling loop (C11): ticks the [`CoordinatorStrategy`],
//! hands claimed inbox work through the [`Dispatcher`] on the configured
//! [`ExecutionStrategy`], publishes claimed outbox work through an injected
//! [`Transport`], and queues completion/failure reports for the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coordinator::{CoordinatorStrategy, FailureReport, InboxWork, OutboxWork, ReceptorOutcome};
use crate::dispatcher::Dispatcher;
use crate::envelope::{Hop, MessageEnvelope, ServiceInstanceRef};
use crate::error::{CoordinatorError, ProcessingFailure};
use crate::execution::{ExecutionError, ExecutionStrategy, Task};
use crate::ids::{CausationId, CorrelationId, MessageId};
use crate::status::FailureReason;

/// The seam the worker loop hands outbox work to for actual publication.
/// Concrete transports (AMQP-like brokers, an in-process bus, ...) are out
/// of this crate's scope; it only depends on this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, work: &OutboxWork) -> Result<(), ProcessingFailure>;
}

fn execution_failure_reason(error: &ExecutionError) -> FailureReason {
    match error {
        ExecutionError::TaskFailed(failure) => failure.reason,
        ExecutionError::NotRunning | ExecutionError::Stopped => FailureReason::TransportNotReady,
    }
}

/// Reads back the correlation/causation ids [`DispatchContext::emit`]
/// stamped into `metadata` on the outbox side, so the chain survives the
/// outbox→inbox boundary instead of being severed at every hop. Absent or
/// malformed metadata means this message originated outside Whizbang (or
/// predates this stamping) and is treated as its own origin, same as
/// before.
fn origin_hop(message_id: MessageId, metadata: &serde_json::Value, service_instance: ServiceInstanceRef) -> Hop {
    match propagated_ids(metadata) {
        Some((correlation_id, causation_id)) => {
            let mut hop = Hop::origin(service_instance, correlation_id);
            hop.causation_id = causation_id;
            hop
        }
        None => {
            let correlation_id = CorrelationId::from_external(message_id.as_uuid());
            Hop::origin(service_instance, correlation_id)
        }
    }
}

fn propagated_ids(metadata: &serde_json::Value) -> Option<(CorrelationId, CausationId)> {
    let correlation_id = metadata.get("correlation_id")?.as_str()?.parse().ok()?;
    let causation_id = metadata.get("causation_id")?.as_str()?.parse().ok()?;
    Some((correlation_id, causation_id))
}

/// Drives one service instance's share of the work: tick the strategy,
/// dispatch what comes back, report what happened on the next tick.
pub struct WorkerLoop<T> {
    strategy: Arc<dyn CoordinatorStrategy>,
    dispatcher: Arc<Dispatcher<T>>,
    executor: Arc<dyn ExecutionStrategy>,
    transport: Arc<dyn Transport>,
    service_instance: ServiceInstanceRef,
    poll_interval: Duration,
    cancellation: CancellationToken,
}

impl<T> WorkerLoop<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        strategy: Arc<dyn CoordinatorStrategy>,
        dispatcher: Arc<Dispatcher<T>>,
        executor: Arc<dyn ExecutionStrategy>,
        transport: Arc<dyn Transport>,
        service_instance: ServiceInstanceRef,
        poll_interval: Duration,
    ) -> Self {
        Self {
            strategy,
            dispatcher,
            executor,
            transport,
            service_instance,
            poll_interval,
            cancellation: CancellationToken::new(),
        }
    }

    /// A child handle callers can hold to cancel this loop independently of
    /// whatever token governs the rest of the process.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Spawns the polling task. Ticks until `cancel` is called; the in-flight
    /// tick, if any, is allowed to finish before the task exits.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.cancellation.cancelled() => break,
                }
                if let Err(error) = self.tick().await {
                    warn!(%error, "worker loop tick failed");
                }
            }
        })
    }

    /// One heartbeat-flush-dispatch round. Exposed directly so tests and
    /// callers that want their own scheduling don't have to go through
    /// `spawn`.
    #[tracing::instrument(skip(self), fields(service = %self.service_instance.service_name))]
    pub async fn tick(&self) -> Result<(), CoordinatorError> {
        let batch = self.strategy.flush().await?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            outbox = batch.outbox_work.len(),
            inbox = batch.inbox_work.len(),
            "claimed work"
        );

        for work in batch.outbox_work {
            self.handle_outbox(work);
        }
        for work in batch.inbox_work {
            self.handle_inbox(work);
        }
        Ok(())
    }

    fn handle_outbox(&self, work: OutboxWork) {
        let transport = self.transport.clone();
        let strategy = self.strategy.clone();
        let executor = self.executor.clone();
        let message_id = work.message_id;

        tokio::spawn(async move {
            let task: Task = Box::pin(async move { transport.publish(&work).await });
            match executor.execute(task).await {
                Ok(()) => strategy.queue_outbox_completion(message_id),
                Err(error) => strategy.queue_outbox_failure(FailureReport {
                    message_id,
                    reason: execution_failure_reason(&error),
                    error: error.to_string(),
                }),
            }
        });
    }

    fn handle_inbox(&self, work: InboxWork) {
        let dispatcher = self.dispatcher.clone();
        let executor = self.executor.clone();
        let strategy = self.strategy.clone();
        let reject_strategy = self.strategy.clone();
        let service_instance = self.service_instance.clone();
        let message_id = work.message_id;
        let handler_name = self.service_instance.service_name.clone();

        let payload: T = match serde_json::from_value(work.message_data.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                strategy.queue_inbox_failure(FailureReport {
                    message_id,
                    reason: FailureReason::SerializationError,
                    error: error.to_string(),
                });
                return;
            }
        };

        let origin = origin_hop(message_id, &work.metadata, service_instance);
        let envelope = MessageEnvelope::from_parts(message_id, payload, vec![origin], work.scope.clone());

        tokio::spawn(async move {
            let task: Task = Box::pin(async move {
                match dispatcher.dispatch(envelope).await {
                    Ok(outcome) => {
                        for emitted in outcome.emitted {
                            strategy.queue_new_outbox(emitted);
                        }
                        strategy.queue_receptor_completion(ReceptorOutcome {
                            message_id,
                            handler_name: handler_name.clone(),
                            succeeded: true,
                            error: None,
                        });
                        strategy.queue_inbox_completion(message_id);
                        Ok(())
                    }
                    Err(error) => {
                        let reason = error.failure_reason();
                        strategy.queue_receptor_failure(ReceptorOutcome {
                            message_id,
                            handler_name: handler_name.clone(),
                            succeeded: false,
                            error: Some(error.to_string()),
                        });
                        strategy.queue_inbox_failure(FailureReport {
                            message_id,
                            reason,
                            error: error.to_string(),
                        });
                        Err(ProcessingFailure::new(reason, error.to_string()))
                    }
                }
            });

            // `TaskFailed` means the task body above already queued the
            // failure report; any other rejection means the task never ran
            // at all and nothing has reported on this item's behalf yet.
            if let Err(error @ (ExecutionError::NotRunning | ExecutionError::Stopped)) =
                executor.execute(task).await
            {
                reject_strategy.queue_inbox_failure(FailureReport {
                    message_id,
                    reason: execution_failure_reason(&error),
                    error: error.to_string(),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::InMemoryCheckpointStore;
    use crate::coordinator::{BatchedStrategy, InMemoryWorkCoordinator, Topology};
    use crate::dedup::InMemoryDeduplicationTable;
    use crate::dispatcher::{DispatchContext, HandlerRegistry, LifecycleStage, Receptor};
    use crate::execution::SerialExecutor;
    use crate::ids::{InstanceId, MessageId};
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    fn instance(name: &str) -> ServiceInstanceRef {
        ServiceInstanceRef {
            service_name: name.into(),
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

    struct RecordingReceptor(Arc<SyncMutex<Vec<String>>>);

    #[async_trait]
    impl Receptor<String> for RecordingReceptor {
        async fn handle(
            &self,
            envelope: &mut MessageEnvelope<String>,
            _ctx: &DispatchContext,
        ) -> Result<(), ProcessingFailure> {
            self.0.lock().push(envelope.payload().clone());
            Ok(())
        }
    }

    struct NullTransport(Arc<SyncMutex<Vec<String>>>);

    #[async_trait]
    impl Transport for NullTransport {
        async fn publish(&self, work: &OutboxWork) -> Result<(), ProcessingFailure> {
            self.0.lock().push(work.destination.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_tick_dispatches_claimed_inbox_work_and_reports_completion() {
        let coordinator = Arc::new(InMemoryWorkCoordinator::new(
            Arc::new(InMemoryDeduplicationTable::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        ));
        let instance_id = InstanceId::generate();
        let strategy = BatchedStrategy::new(
            coordinator,
            instance_id,
            "svc",
            "localhost",
            topology(),
            Duration::from_secs(3600),
            1000,
        );

        let message_id = MessageId::generate();
        strategy.queue_new_inbox(crate::model::InboxRecord::new_pending(
            message_id,
            "svc-inbox",
            "Greeting",
            json!("hello"),
            chrono::Utc::now(),
        ));
        strategy.flush().await.unwrap();

        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let registry: Arc<HandlerRegistry<String>> = Arc::new(HandlerRegistry::new());
        registry.register(LifecycleStage::ReceptorInvoke, Arc::new(RecordingReceptor(seen.clone())));
        let dispatcher = Arc::new(Dispatcher::new(registry, instance("svc")));

        let executor: Arc<dyn ExecutionStrategy> = Arc::new(SerialExecutor::new(None));
        executor.start().await.unwrap();

        let published = Arc::new(SyncMutex::new(Vec::new()));
        let transport: Arc<dyn Transport> = Arc::new(NullTransport(published));

        let worker: WorkerLoop<String> =
            WorkerLoop::new(strategy.clone(), dispatcher, executor, transport, instance("svc"), Duration::from_millis(10));

        worker.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock(), vec!["hello".to_string()]);

        let batch = strategy.flush().await.unwrap();
        assert!(batch.is_empty(), "completion reports should already have cleared claimable work");
    }

    #[test]
    fn origin_hop_inherits_correlation_and_causation_stamped_by_emit() {
        let correlation_id = CorrelationId::generate();
        let causation_id = CausationId::generate();
        let metadata = json!({
            "correlation_id": correlation_id.to_string(),
            "causation_id": causation_id.to_string(),
        });

        let hop = origin_hop(MessageId::generate(), &metadata, instance("svc"));
        assert_eq!(hop.correlation_id, correlation_id);
        assert_eq!(hop.causation_id, causation_id);
    }

    #[test]
    fn origin_hop_falls_back_to_self_caused_when_metadata_has_no_propagation() {
        let message_id = MessageId::generate();
        let hop = origin_hop(message_id, &serde_json::Value::Null, instance("svc"));
        assert_eq!(hop.correlation_id.as_uuid(), message_id.as_uuid());
    }
}
