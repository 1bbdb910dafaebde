//! Client-side strategies that drive the coordinator RPC (C7): `Immediate`
//! issues one call per operation, `Batched` accumulates operations and
//! flushes on a timer or size threshold. Both expose the same queueing
//! interface to the worker loop so it never needs to know which is active.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::types::{FailureReport, PerspectiveOutcome, ReceptorOutcome, Topology};
use super::{ProcessWorkBatchRequest, WorkBatch, WorkCoordinator};
use crate::error::CoordinatorError;
use crate::ids::{InstanceId, MessageId};
use crate::model::{InboxRecord, OutboxRecord};

/// Everything queued since the last flush, independent of which strategy is
/// driving it.
#[derive(Default)]
struct PendingOperations {
    outbox_completed_ids: Vec<MessageId>,
    outbox_failed: Vec<FailureReport>,
    inbox_completed_ids: Vec<MessageId>,
    inbox_failed: Vec<FailureReport>,
    receptor_completions: Vec<ReceptorOutcome>,
    receptor_failures: Vec<ReceptorOutcome>,
    perspective_completions: Vec<PerspectiveOutcome>,
    perspective_failures: Vec<PerspectiveOutcome>,
    new_outbox: Vec<OutboxRecord>,
    new_inbox: Vec<InboxRecord>,
    renew_outbox_lease_ids: Vec<MessageId>,
    renew_inbox_lease_ids: Vec<MessageId>,
}

impl PendingOperations {
    fn len(&self) -> usize {
        self.outbox_completed_ids.len()
            + self.outbox_failed.len()
            + self.inbox_completed_ids.len()
            + self.inbox_failed.len()
            + self.receptor_completions.len()
            + self.receptor_failures.len()
            + self.perspective_completions.len()
            + self.perspective_failures.len()
            + self.new_outbox.len()
            + self.new_inbox.len()
            + self.renew_outbox_lease_ids.len()
            + self.renew_inbox_lease_ids.len()
    }

    fn take(&mut self) -> PendingOperations {
        std::mem::take(self)
    }

    fn into_request(
        self,
        instance_id: InstanceId,
        service_name: String,
        host: String,
        topology: Topology,
    ) -> ProcessWorkBatchRequest {
        ProcessWorkBatchRequest {
            instance_id,
            service_name,
            host,
            pid: std::process::id(),
            metadata: None,
            outbox_completed_ids: self.outbox_completed_ids,
            outbox_failed: self.outbox_failed,
            inbox_completed_ids: self.inbox_completed_ids,
            inbox_failed: self.inbox_failed,
            receptor_completions: self.receptor_completions,
            receptor_failures: self.receptor_failures,
            perspective_completions: self.perspective_completions,
            perspective_failures: self.perspective_failures,
            new_outbox: self.new_outbox,
            new_inbox: self.new_inbox,
            renew_outbox_lease_ids: self.renew_outbox_lease_ids,
            renew_inbox_lease_ids: self.renew_inbox_lease_ids,
            flags: super::CoordinatorFlags::empty(),
            topology,
        }
    }
}

/// The interface the worker loop and dispatcher emit against, regardless of
/// which flush cadence is behind it. Queueing never blocks the caller;
/// `flush` is the only method that actually calls the coordinator.
#[async_trait]
pub trait CoordinatorStrategy: Send + Sync {
    fn queue_new_outbox(&self, record: OutboxRecord);
    fn queue_new_inbox(&self, record: InboxRecord);
    fn queue_outbox_completion(&self, message_id: MessageId);
    fn queue_inbox_completion(&self, message_id: MessageId);
    fn queue_outbox_failure(&self, failure: FailureReport);
    fn queue_inbox_failure(&self, failure: FailureReport);
    fn queue_receptor_completion(&self, outcome: ReceptorOutcome);
    fn queue_receptor_failure(&self, outcome: ReceptorOutcome);
    fn queue_perspective_completion(&self, outcome: PerspectiveOutcome);
    fn queue_perspective_failure(&self, outcome: PerspectiveOutcome);
    fn queue_outbox_lease_renewal(&self, message_id: MessageId);
    fn queue_inbox_lease_renewal(&self, message_id: MessageId);

    /// Sends everything queued so far in one `process_work_batch` call and
    /// returns the resulting work batch.
    async fn flush(&self) -> Result<WorkBatch, CoordinatorError>;
}

/// One coordinator call per queued operation: the queue is flushed
/// immediately inline with each `queue_*` call. Lowest latency, highest
/// database load; every `queue_*` performs a full round trip by itself and
/// ignores anything queued by a concurrent caller in between.
pub struct ImmediateStrategy<C: WorkCoordinator> {
    coordinator: Arc<C>,
    instance_id: InstanceId,
    service_name: String,
    host: String,
    topology: Topology,
}

impl<C: WorkCoordinator> ImmediateStrategy<C> {
    pub fn new(
        coordinator: Arc<C>,
        instance_id: InstanceId,
        service_name: impl Into<String>,
        host: impl Into<String>,
        topology: Topology,
    ) -> Self {
        Self {
            coordinator,
            instance_id,
            service_name: service_name.into(),
            host: host.into(),
            topology,
        }
    }

    async fn flush_single(&self, pending: PendingOperations) -> Result<WorkBatch, CoordinatorError> {
        let request = pending.into_request(
            self.instance_id,
            self.service_name.clone(),
            self.host.clone(),
            self.topology.clone(),
        );
        self.coordinator.process_work_batch(request).await
    }
}

impl<C: WorkCoordinator + 'static> ImmediateStrategy<C> {
    /// Fires one `process_work_batch` call carrying exactly `pending`,
    /// detached from the caller so queueing never blocks it. Cloning the
    /// coordinator handle and topology rather than `self` keeps
    /// `ImmediateStrategy` usable without requiring callers to hold it
    /// behind an `Arc`.
    fn spawn_flush(&self, pending: PendingOperations) {
        let coordinator = self.coordinator.clone();
        let instance_id = self.instance_id;
        let service_name = self.service_name.clone();
        let host = self.host.clone();
        let topology = self.topology.clone();
        tokio::spawn(async move {
            let request = pending.into_request(instance_id, service_name, host, topology);
            let _ = coordinator.process_work_batch(request).await;
        });
    }
}

#[async_trait]
impl<C: WorkCoordinator + 'static> CoordinatorStrategy for ImmediateStrategy<C> {
    fn queue_new_outbox(&self, record: OutboxRecord) {
        let mut pending = PendingOperations::default();
        pending.new_outbox.push(record);
        self.spawn_flush(pending);
    }

    fn queue_new_inbox(&self, record: InboxRecord) {
        let mut pending = PendingOperations::default();
        pending.new_inbox.push(record);
        self.spawn_flush(pending);
    }

    fn queue_outbox_completion(&self, message_id: MessageId) {
        let mut pending = PendingOperations::default();
        pending.outbox_completed_ids.push(message_id);
        self.spawn_flush(pending);
    }

    fn queue_inbox_completion(&self, message_id: MessageId) {
        let mut pending = PendingOperations::default();
        pending.inbox_completed_ids.push(message_id);
        self.spawn_flush(pending);
    }

    fn queue_outbox_failure(&self, failure: FailureReport) {
        let mut pending = PendingOperations::default();
        pending.outbox_failed.push(failure);
        self.spawn_flush(pending);
    }

    fn queue_inbox_failure(&self, failure: FailureReport) {
        let mut pending = PendingOperations::default();
        pending.inbox_failed.push(failure);
        self.spawn_flush(pending);
    }

    fn queue_receptor_completion(&self, outcome: ReceptorOutcome) {
        let mut pending = PendingOperations::default();
        pending.receptor_completions.push(outcome);
        self.spawn_flush(pending);
    }

    fn queue_receptor_failure(&self, outcome: ReceptorOutcome) {
        let mut pending = PendingOperations::default();
        pending.receptor_failures.push(outcome);
        self.spawn_flush(pending);
    }

    fn queue_perspective_completion(&self, outcome: PerspectiveOutcome) {
        let mut pending = PendingOperations::default();
        pending.perspective_completions.push(outcome);
        self.spawn_flush(pending);
    }

    fn queue_perspective_failure(&self, outcome: PerspectiveOutcome) {
        let mut pending = PendingOperations::default();
        pending.perspective_failures.push(outcome);
        self.spawn_flush(pending);
    }

    fn queue_outbox_lease_renewal(&self, message_id: MessageId) {
        let mut pending = PendingOperations::default();
        pending.renew_outbox_lease_ids.push(message_id);
        self.spawn_flush(pending);
    }

    fn queue_inbox_lease_renewal(&self, message_id: MessageId) {
        let mut pending = PendingOperations::default();
        pending.renew_inbox_lease_ids.push(message_id);
        self.spawn_flush(pending);
    }

    /// With nothing queued by this call itself, a bare heartbeat-and-claim
    /// round trip — the shape the worker loop drives on every tick.
    async fn flush(&self) -> Result<WorkBatch, CoordinatorError> {
        self.flush_single(PendingOperations::default()).await
    }
}

/// Time- and size-triggered flush: queues accumulate locally and a single
/// background task flushes them either every `flush_interval` or once
/// `flush_size` operations have accumulated, whichever comes first.
pub struct BatchedStrategy<C: WorkCoordinator> {
    coordinator: Arc<C>,
    instance_id: InstanceId,
    service_name: String,
    host: String,
    topology: Topology,
    pending: Mutex<PendingOperations>,
    flush_size: usize,
    notify: Notify,
}

impl<C: WorkCoordinator + 'static> BatchedStrategy<C> {
    pub fn new(
        coordinator: Arc<C>,
        instance_id: InstanceId,
        service_name: impl Into<String>,
        host: impl Into<String>,
        topology: Topology,
        flush_interval: Duration,
        flush_size: usize,
    ) -> Arc<Self> {
        let strategy = Arc::new(Self {
            coordinator,
            instance_id,
            service_name: service_name.into(),
            host: host.into(),
            topology,
            pending: Mutex::new(PendingOperations::default()),
            flush_size,
            notify: Notify::new(),
        });

        let background = strategy.clone();
        tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = background.notify.notified() => {}
                }
                let _ = background.flush().await;
            }
        });

        strategy
    }

    fn maybe_wake(&self) {
        if self.pending.lock().len() >= self.flush_size {
            self.notify.notify_one();
        }
    }
}

#[async_trait]
impl<C: WorkCoordinator + 'static> CoordinatorStrategy for BatchedStrategy<C> {
    fn queue_new_outbox(&self, record: OutboxRecord) {
        self.pending.lock().new_outbox.push(record);
        self.maybe_wake();
    }

    fn queue_new_inbox(&self, record: InboxRecord) {
        self.pending.lock().new_inbox.push(record);
        self.maybe_wake();
    }

    fn queue_outbox_completion(&self, message_id: MessageId) {
        self.pending.lock().outbox_completed_ids.push(message_id);
        self.maybe_wake();
    }

    fn queue_inbox_completion(&self, message_id: MessageId) {
        self.pending.lock().inbox_completed_ids.push(message_id);
        self.maybe_wake();
    }

    fn queue_outbox_failure(&self, failure: FailureReport) {
        self.pending.lock().outbox_failed.push(failure);
        self.maybe_wake();
    }

    fn queue_inbox_failure(&self, failure: FailureReport) {
        self.pending.lock().inbox_failed.push(failure);
        self.maybe_wake();
    }

    fn queue_receptor_completion(&self, outcome: ReceptorOutcome) {
        self.pending.lock().receptor_completions.push(outcome);
        self.maybe_wake();
    }

    fn queue_receptor_failure(&self, outcome: ReceptorOutcome) {
        self.pending.lock().receptor_failures.push(outcome);
        self.maybe_wake();
    }

    fn queue_perspective_completion(&self, outcome: PerspectiveOutcome) {
        self.pending.lock().perspective_completions.push(outcome);
        self.maybe_wake();
    }

    fn queue_perspective_failure(&self, outcome: PerspectiveOutcome) {
        self.pending.lock().perspective_failures.push(outcome);
        self.maybe_wake();
    }

    fn queue_outbox_lease_renewal(&self, message_id: MessageId) {
        self.pending.lock().renew_outbox_lease_ids.push(message_id);
        self.maybe_wake();
    }

    fn queue_inbox_lease_renewal(&self, message_id: MessageId) {
        self.pending.lock().renew_inbox_lease_ids.push(message_id);
        self.maybe_wake();
    }

    async fn flush(&self) -> Result<WorkBatch, CoordinatorError> {
        let pending = self.pending.lock().take();
        let request = pending.into_request(
            self.instance_id,
            self.service_name.clone(),
            self.host.clone(),
            self.topology.clone(),
        );
        self.coordinator.process_work_batch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::InMemoryCheckpointStore;
    use crate::coordinator::InMemoryWorkCoordinator;
    use crate::dedup::InMemoryDeduplicationTable;
    use serde_json::Value as Json;

    fn topology() -> Topology {
        Topology {
            partition_count: 16,
            lease_seconds: 300,
            stale_threshold_seconds: 600,
            max_delivery_attempts: 5,
        }
    }

    #[tokio::test]
    async fn batched_strategy_flushes_on_size_threshold() {
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
            Duration::from_secs(3600),
            1,
        );

        strategy.queue_new_outbox(OutboxRecord::new_pending(
            MessageId::generate(),
            "dest",
            "Notify",
            Json::Null,
            chrono::Utc::now(),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(strategy.pending.lock().len(), 0, "size threshold should have triggered a flush");
    }

    #[tokio::test]
    async fn batched_strategy_flush_returns_claimed_work() {
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
            Duration::from_secs(3600),
            1000,
        );

        strategy.queue_new_outbox(OutboxRecord::new_pending(
            MessageId::generate(),
            "dest",
            "Notify",
            Json::Null,
            chrono::Utc::now(),
        ));
        let batch = strategy.flush().await.unwrap();
        assert_eq!(batch.outbox_work.len(), 1);
    }
}
