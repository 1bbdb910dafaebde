//! In-memory reference implementation of the §4.1 batch RPC. Backs this
//! crate's own tests and the facade crate's default (non-durable) wiring.
//! `whizbang-postgres::coordinator` implements the identical contract as
//! one `sqlx::Transaction`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{
    CoordinatorFlags, InboxWork, OutboxWork, ProcessWorkBatchRequest, WorkBatch, WorkCoordinator,
};
use crate::checkpoints::CheckpointStore;
use crate::dedup::DeduplicationTable;
use crate::error::CoordinatorError;
use crate::ids::{MessageId, StreamKey};
use crate::model::{ActiveStreamRecord, InboxRecord, OutboxRecord, ServiceInstance};
use crate::partition::{balance_partitions, compute_partition};
use crate::status::StatusFlags;

const DEFAULT_CLAIM_QUOTA_PER_PARTITION: usize = 64;

/// In-memory coordinator state. Every field here corresponds to one of the
/// tables named in §6.1; a durable adapter persists the same shapes across
/// a real transaction instead of a `parking_lot::RwLock`.
pub struct InMemoryWorkCoordinator {
    instances: RwLock<HashMap<String, ServiceInstance>>,
    active_streams: RwLock<HashMap<StreamKey, ActiveStreamRecord>>,
    outbox: RwLock<HashMap<MessageId, OutboxRecord>>,
    inbox: RwLock<HashMap<MessageId, InboxRecord>>,
    dedup: std::sync::Arc<dyn DeduplicationTable>,
    checkpoints: std::sync::Arc<dyn CheckpointStore>,
    claim_quota_per_partition: usize,
}

impl InMemoryWorkCoordinator {
    pub fn new(
        dedup: std::sync::Arc<dyn DeduplicationTable>,
        checkpoints: std::sync::Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            active_streams: RwLock::new(HashMap::new()),
            outbox: RwLock::new(HashMap::new()),
            inbox: RwLock::new(HashMap::new()),
            dedup,
            checkpoints,
            claim_quota_per_partition: DEFAULT_CLAIM_QUOTA_PER_PARTITION,
        }
    }

    pub fn with_claim_quota(mut self, quota_per_partition: usize) -> Self {
        self.claim_quota_per_partition = quota_per_partition.max(1);
        self
    }

    /// Snapshot of one outbox row, for tests and operator inspection.
    pub fn outbox_row(&self, message_id: MessageId) -> Option<OutboxRecord> {
        self.outbox.read().get(&message_id).cloned()
    }

    /// Snapshot of one inbox row, for tests and operator inspection.
    pub fn inbox_row(&self, message_id: MessageId) -> Option<InboxRecord> {
        self.inbox.read().get(&message_id).cloned()
    }

    fn claim_outbox(
        &self,
        caller: &str,
        owner_of_partition: &HashMap<u32, String>,
        now: chrono::DateTime<Utc>,
        lease_seconds: u64,
    ) -> Vec<OutboxWork> {
        let mut outbox = self.outbox.write();
        let snapshot: Vec<OutboxRecord> = outbox.values().cloned().collect();
        let claimed_ids = select_claimable(&snapshot, caller, owner_of_partition, now, self.claim_quota_per_partition);

        let mut work = Vec::with_capacity(claimed_ids.len());
        for message_id in claimed_ids {
            let record = outbox.get_mut(&message_id).expect("id came from snapshot");
            record.instance_id = Some(caller.to_string());
            record.lease_expiry = Some(now + chrono::Duration::seconds(lease_seconds as i64));
            record.attempts += 1;
            work.push(OutboxWork {
                message_id: record.message_id,
                destination: record.destination.clone(),
                message_type: record.message_type.clone(),
                message_data: record.message_data.clone(),
                metadata: record.metadata.clone(),
                scope: record.scope.clone(),
                attempts: record.attempts,
            });
        }
        work
    }

    fn claim_inbox(
        &self,
        caller: &str,
        owner_of_partition: &HashMap<u32, String>,
        now: chrono::DateTime<Utc>,
        lease_seconds: u64,
    ) -> Vec<InboxWork> {
        let mut inbox = self.inbox.write();
        let snapshot: Vec<InboxRecord> = inbox.values().cloned().collect();
        let buffers: Vec<OutboxRecord> = snapshot.iter().map(as_buffer_shape).collect();
        let claimed_ids = select_claimable(&buffers, caller, owner_of_partition, now, self.claim_quota_per_partition);

        let mut work = Vec::with_capacity(claimed_ids.len());
        let mut active_streams = self.active_streams.write();
        for message_id in claimed_ids {
            let record = inbox.get_mut(&message_id).expect("id came from snapshot");
            record.instance_id = Some(caller.to_string());
            record.lease_expiry = Some(now + chrono::Duration::seconds(lease_seconds as i64));
            record.attempts += 1;
            if let Some(stream_id) = record.stream_id {
                let entry = active_streams.entry(stream_id).or_insert_with(|| ActiveStreamRecord {
                    stream_id,
                    partition_number: record.partition_number.unwrap_or(0),
                    assigned_instance_id: None,
                    lease_expiry: None,
                    created_at: now,
                    last_activity_at: now,
                });
                entry.assigned_instance_id = Some(caller.to_string());
                entry.lease_expiry = record.lease_expiry;
                entry.last_activity_at = now;
            }
            work.push(InboxWork {
                message_id: record.message_id,
                destination: record.destination.clone(),
                message_type: record.message_type.clone(),
                message_data: record.message_data.clone(),
                metadata: record.metadata.clone(),
                scope: record.scope.clone(),
                attempts: record.attempts,
            });
        }
        work
    }
}

/// Projects an [`InboxRecord`] onto the fields [`select_claimable`] needs,
/// so the claim algorithm is written once and shared by both tables.
fn as_buffer_shape(record: &InboxRecord) -> OutboxRecord {
    OutboxRecord {
        message_id: record.message_id,
        destination: record.destination.clone(),
        message_type: record.message_type.clone(),
        message_data: record.message_data.clone(),
        metadata: record.metadata.clone(),
        scope: record.scope.clone(),
        stream_id: record.stream_id,
        partition_number: record.partition_number,
        is_event: record.is_event,
        status_flags: record.status_flags,
        attempts: record.attempts,
        error: record.error.clone(),
        instance_id: record.instance_id.clone(),
        lease_expiry: record.lease_expiry,
        failure_reason: record.failure_reason,
        scheduled_for: record.scheduled_for,
        created_at: record.created_at,
        published_at: record.published_at,
        processed_at: record.processed_at,
    }
}

/// The claim rule shared by outbox and inbox: a row is claimable iff its
/// status says so, its lease is free (or held by an instance no longer
/// live), its partition is owned by `caller`, and every earlier row in the
/// same stream is terminal. Returns ids in the order they should be
/// claimed, respecting the per-partition quota.
fn select_claimable(
    rows: &[OutboxRecord],
    caller: &str,
    owner_of_partition: &HashMap<u32, String>,
    now: chrono::DateTime<Utc>,
    quota_per_partition: usize,
) -> Vec<MessageId> {
    let mut by_stream: HashMap<StreamKey, Vec<&OutboxRecord>> = HashMap::new();
    for row in rows {
        if let Some(stream_id) = row.stream_id {
            by_stream.entry(stream_id).or_default().push(row);
        }
    }
    for group in by_stream.values_mut() {
        group.sort_by_key(|row| row.created_at);
    }

    let mut ordered: Vec<&OutboxRecord> = rows.iter().collect();
    ordered.sort_by_key(|row| row.created_at);

    let mut claimed_per_partition: HashMap<u32, usize> = HashMap::new();
    let mut claimed = Vec::new();

    for row in ordered {
        if !row.is_claimable(now) {
            continue;
        }
        let partition_owned = row
            .partition_number
            .map(|p| owner_of_partition.get(&p).map(|owner| owner == caller).unwrap_or(true))
            .unwrap_or(true);
        if !partition_owned {
            continue;
        }
        if let Some(stream_id) = row.stream_id {
            let blocked = by_stream[&stream_id]
                .iter()
                .take_while(|candidate| candidate.created_at < row.created_at)
                .any(|candidate| !is_terminal(candidate));
            if blocked {
                continue;
            }
        }
        let partition = row.partition_number.unwrap_or(0);
        let count = claimed_per_partition.entry(partition).or_insert(0);
        if *count >= quota_per_partition {
            continue;
        }
        *count += 1;
        claimed.push(row.message_id);
    }

    claimed
}

fn is_terminal(row: &OutboxRecord) -> bool {
    row.status_flags.contains(StatusFlags::TERMINAL_FAILURE) || row.status_flags.contains(StatusFlags::COMPLETED)
}

#[async_trait]
impl WorkCoordinator for InMemoryWorkCoordinator {
    #[tracing::instrument(skip(self, request), fields(instance_id = %request.instance_id, service = %request.service_name))]
    async fn process_work_batch(
        &self,
        request: ProcessWorkBatchRequest,
    ) -> Result<WorkBatch, CoordinatorError> {
        let now = Utc::now();
        let caller = request.instance_id.to_string();

        // 1. Register / heartbeat.
        {
            let mut instances = self.instances.write();
            instances
                .entry(caller.clone())
                .and_modify(|instance| {
                    instance.last_heartbeat_at = now;
                    instance.service_name = request.service_name.clone();
                })
                .or_insert_with(|| ServiceInstance {
                    instance_id: caller.clone(),
                    service_name: request.service_name.clone(),
                    host_name: request.host.clone(),
                    process_id: request.pid,
                    started_at: now,
                    last_heartbeat_at: now,
                    metadata: request.metadata.clone(),
                });
        }

        // 2. Reap stale instances.
        let stale_threshold = request.topology.stale_threshold_seconds as i64;
        {
            let mut instances = self.instances.write();
            instances.retain(|_, instance| !instance.is_stale(now, stale_threshold));
        }
        let live_instance_ids: Vec<String> = self.instances.read().keys().cloned().collect();
        let owner_of_partition: HashMap<u32, String> =
            balance_partitions(request.topology.partition_count, live_instance_ids).into_iter().collect();

        // Sweep streams whose lease lapsed: orphan them so any owning
        // instance may claim the stream again.
        {
            let mut active_streams = self.active_streams.write();
            for stream in active_streams.values_mut() {
                if stream.lease_expiry.map(|expiry| expiry <= now).unwrap_or(false) {
                    stream.assigned_instance_id = None;
                    stream.lease_expiry = None;
                }
            }
        }

        // 3. Persist results.
        {
            let mut outbox = self.outbox.write();
            for message_id in &request.outbox_completed_ids {
                if let Some(record) = outbox.get_mut(message_id) {
                    record.status_flags.mark_completed();
                    record.published_at = Some(now);
                    record.processed_at = Some(now);
                }
            }
            for failure in &request.outbox_failed {
                if let Some(record) = outbox.get_mut(&failure.message_id) {
                    record.status_flags.mark_terminal_failure();
                    record.failure_reason = failure.reason;
                    record.error = Some(failure.error.clone());
                    record.attempts += 1;
                }
            }
            for id in &request.renew_outbox_lease_ids {
                if let Some(record) = outbox.get_mut(id) {
                    if record.instance_id.as_deref() == Some(caller.as_str()) {
                        record.lease_expiry =
                            Some(now + chrono::Duration::seconds(request.topology.lease_seconds as i64));
                    }
                }
            }
        }
        {
            let mut inbox = self.inbox.write();
            for message_id in &request.inbox_completed_ids {
                if let Some(record) = inbox.get_mut(message_id) {
                    record.status_flags.mark_completed();
                    record.processed_at = Some(now);
                }
            }
            for failure in &request.inbox_failed {
                if let Some(record) = inbox.get_mut(&failure.message_id) {
                    record.status_flags.mark_terminal_failure();
                    record.failure_reason = failure.reason;
                    record.error = Some(failure.error.clone());
                    record.attempts += 1;
                }
            }
            for outcome in &request.receptor_completions {
                if let Some(record) = inbox.get_mut(&outcome.message_id) {
                    record.status_flags.insert(StatusFlags::RECEPTOR_PROCESSED);
                    record.handler_name = Some(outcome.handler_name.clone());
                }
            }
            for outcome in &request.receptor_failures {
                if let Some(record) = inbox.get_mut(&outcome.message_id) {
                    record.attempts += 1;
                    record.error = outcome.error.clone();
                    if record.attempts >= request.topology.max_delivery_attempts {
                        record.status_flags.mark_terminal_failure();
                        record.failure_reason = crate::status::FailureReason::MaxAttemptsExceeded;
                    }
                }
            }
            for id in &request.renew_inbox_lease_ids {
                if let Some(record) = inbox.get_mut(id) {
                    if record.instance_id.as_deref() == Some(caller.as_str()) {
                        record.lease_expiry =
                            Some(now + chrono::Duration::seconds(request.topology.lease_seconds as i64));
                    }
                }
            }
        }
        for outcome in request
            .perspective_completions
            .iter()
            .chain(request.perspective_failures.iter())
        {
            self.checkpoints
                .record_completion(
                    outcome.stream_id,
                    &outcome.projection_name,
                    outcome.last_event_id,
                    outcome.status,
                    outcome.error.clone(),
                )
                .await;
        }

        // 4. Write new rows, deduplicated against the permanent table.
        {
            let mut outbox = self.outbox.write();
            for mut record in request.new_outbox {
                if self.dedup.contains(record.message_id).await {
                    continue;
                }
                self.dedup.record_first_seen(record.message_id).await;
                if let Some(stream_id) = record.stream_id {
                    record.partition_number =
                        Some(compute_partition(stream_id, request.topology.partition_count));
                }
                outbox.insert(record.message_id, record);
            }
        }
        {
            let mut inbox = self.inbox.write();
            for mut record in request.new_inbox {
                if self.dedup.contains(record.message_id).await {
                    continue;
                }
                self.dedup.record_first_seen(record.message_id).await;
                if let Some(stream_id) = record.stream_id {
                    record.partition_number =
                        Some(compute_partition(stream_id, request.topology.partition_count));
                }
                inbox.insert(record.message_id, record);
            }
        }

        // 6. Claim work (step 5, lease renewal, already applied above).
        let outbox_work = self.claim_outbox(&caller, &owner_of_partition, now, request.topology.lease_seconds);
        let inbox_work = self.claim_inbox(&caller, &owner_of_partition, now, request.topology.lease_seconds);

        Ok(WorkBatch { outbox_work, inbox_work })
    }
}

#[allow(dead_code)]
fn debug_mode(flags: CoordinatorFlags) -> bool {
    flags.contains(CoordinatorFlags::DEBUG_MODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::InMemoryCheckpointStore;
    use crate::dedup::InMemoryDeduplicationTable;
    use crate::ids::InstanceId;
    use crate::model::OutboxRecord;
    use serde_json::Value as Json;

    fn coordinator() -> InMemoryWorkCoordinator {
        InMemoryWorkCoordinator::new(
            std::sync::Arc::new(InMemoryDeduplicationTable::new()),
            std::sync::Arc::new(InMemoryCheckpointStore::new()),
        )
    }

    fn topology() -> super::super::Topology {
        super::super::Topology {
            partition_count: 16,
            lease_seconds: 300,
            stale_threshold_seconds: 600,
            max_delivery_attempts: 5,
        }
    }

    fn request_with_new_outbox(instance_id: InstanceId, record: OutboxRecord) -> ProcessWorkBatchRequest {
        let mut request = ProcessWorkBatchRequest::heartbeat_only(instance_id, "svc", topology());
        request.new_outbox.push(record);
        request
    }

    #[tokio::test]
    async fn enqueue_then_claim_then_complete_round_trips() {
        let coordinator = coordinator();
        let instance_id = InstanceId::generate();
        let message_id = MessageId::generate();
        let record = OutboxRecord::new_pending(message_id, "dest", "Notify", Json::Null, Utc::now());

        let batch = coordinator
            .process_work_batch(request_with_new_outbox(instance_id, record))
            .await
            .unwrap();
        assert_eq!(batch.outbox_work.len(), 1);
        assert_eq!(batch.outbox_work[0].message_id, message_id);
        assert_eq!(batch.outbox_work[0].attempts, 1);

        let mut complete = ProcessWorkBatchRequest::heartbeat_only(instance_id, "svc", topology());
        complete.outbox_completed_ids.push(message_id);
        let batch = coordinator.process_work_batch(complete).await.unwrap();
        assert!(batch.outbox_work.is_empty());

        let row = coordinator.outbox_row(message_id).unwrap();
        assert!(row.status_flags.contains(StatusFlags::COMPLETED));
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_a_no_op() {
        let coordinator = coordinator();
        let instance_id = InstanceId::generate();
        let message_id = MessageId::generate();
        let record = || OutboxRecord::new_pending(message_id, "dest", "Notify", Json::Null, Utc::now());

        coordinator
            .process_work_batch(request_with_new_outbox(instance_id, record()))
            .await
            .unwrap();

        let mut complete = ProcessWorkBatchRequest::heartbeat_only(instance_id, "svc", topology());
        complete.outbox_completed_ids.push(message_id);
        coordinator.process_work_batch(complete).await.unwrap();

        // Re-enqueueing the same message id after completion must not
        // reset it back to Pending.
        coordinator
            .process_work_batch(request_with_new_outbox(instance_id, record()))
            .await
            .unwrap();
        let row = coordinator.outbox_row(message_id).unwrap();
        assert!(row.status_flags.contains(StatusFlags::COMPLETED));
    }

    #[tokio::test]
    async fn lease_expiry_hands_the_row_to_another_instance() {
        let coordinator = coordinator();
        let instance_a = InstanceId::generate();
        let instance_b = InstanceId::generate();
        let message_id = MessageId::generate();
        let record = OutboxRecord::new_pending(message_id, "dest", "Notify", Json::Null, Utc::now());

        let mut short_lease = topology();
        short_lease.lease_seconds = 0;
        let mut first = ProcessWorkBatchRequest::heartbeat_only(instance_a, "svc", short_lease.clone());
        first.new_outbox.push(record);
        let batch = coordinator.process_work_batch(first).await.unwrap();
        assert_eq!(batch.outbox_work.len(), 1);

        // Lease duration 0 means it is already expired by the time the
        // second instance calls in.
        let second = ProcessWorkBatchRequest::heartbeat_only(instance_b, "svc", short_lease);
        let batch = coordinator.process_work_batch(second).await.unwrap();
        assert_eq!(batch.outbox_work.len(), 1);
        assert_eq!(batch.outbox_work[0].attempts, 2);

        let row = coordinator.outbox_row(message_id).unwrap();
        assert_eq!(row.instance_id.as_deref(), Some(instance_b.to_string().as_str()));
    }

    #[tokio::test]
    async fn per_stream_order_blocks_later_messages_until_earlier_ones_are_terminal() {
        let coordinator = coordinator();
        let instance_id = InstanceId::generate();
        let stream_id = StreamKey::generate();

        let m1 = MessageId::generate();
        let mut r1 = OutboxRecord::new_pending(m1, "dest", "M1", Json::Null, Utc::now());
        r1.stream_id = Some(stream_id);

        let m2 = MessageId::generate();
        let mut r2 = OutboxRecord::new_pending(m2, "dest", "M2", Json::Null, Utc::now() + chrono::Duration::milliseconds(1));
        r2.stream_id = Some(stream_id);

        let mut request = ProcessWorkBatchRequest::heartbeat_only(instance_id, "svc", topology());
        request.new_outbox.push(r1);
        request.new_outbox.push(r2);
        let batch = coordinator.process_work_batch(request).await.unwrap();

        assert_eq!(batch.outbox_work.len(), 1);
        assert_eq!(batch.outbox_work[0].message_id, m1);

        let mut complete = ProcessWorkBatchRequest::heartbeat_only(instance_id, "svc", topology());
        complete.outbox_completed_ids.push(m1);
        let batch = coordinator.process_work_batch(complete).await.unwrap();
        assert_eq!(batch.outbox_work.len(), 1);
        assert_eq!(batch.outbox_work[0].message_id, m2);
    }

    #[tokio::test]
    async fn stale_instance_is_reaped_on_the_next_call() {
        let coordinator = coordinator();
        let instance_a = InstanceId::generate();
        let mut topology_tiny_stale = topology();
        topology_tiny_stale.stale_threshold_seconds = 0;

        coordinator
            .process_work_batch(ProcessWorkBatchRequest::heartbeat_only(
                instance_a,
                "svc",
                topology_tiny_stale.clone(),
            ))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let instance_b = InstanceId::generate();
        coordinator
            .process_work_batch(ProcessWorkBatchRequest::heartbeat_only(
                instance_b,
                "svc",
                topology_tiny_stale,
            ))
            .await
            .unwrap();

        assert!(!coordinator.instances.read().contains_key(&instance_a.to_string()));
    }
}
