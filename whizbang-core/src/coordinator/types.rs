//! Request/response shapes for `process_work_batch`, the single batch RPC
//! described in §4.1. Every field here corresponds to a row of that
//! section's input/output tables.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::{EventId, InstanceId, MessageId, StreamKey};
use crate::model::{InboxRecord, OutboxRecord};
use crate::status::{FailureReason, StatusFlags};

/// Feature toggles carried on a `process_work_batch` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorFlags(u32);

impl CoordinatorFlags {
    pub const DEBUG_MODE: CoordinatorFlags = CoordinatorFlags(0x0001);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: CoordinatorFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CoordinatorFlags {
    type Output = CoordinatorFlags;

    fn bitor(self, rhs: CoordinatorFlags) -> CoordinatorFlags {
        CoordinatorFlags(self.0 | rhs.0)
    }
}

/// One failed message report: `outbox_failed[]` / `inbox_failed[]` entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureReport {
    pub message_id: MessageId,
    pub reason: FailureReason,
    pub error: String,
}

/// One handler-level outcome report: `receptor_completions` /
/// `receptor_failures` entries. Fine-grained relative to the row-level
/// `inbox_completed_ids`/`inbox_failed`: a row can have several receptors,
/// each reporting independently, before the row itself is marked done.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceptorOutcome {
    pub message_id: MessageId,
    pub handler_name: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// A `(stream_id, projection_name)` checkpoint update: `perspective_completions`
/// / `perspective_failures` entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerspectiveOutcome {
    pub stream_id: StreamKey,
    pub projection_name: String,
    pub last_event_id: EventId,
    pub status: StatusFlags,
    pub error: Option<String>,
}

/// Topology parameters a caller supplies on every batch call; these travel
/// with the request rather than living solely on the server so that a
/// rolling deployment can change them without every instance needing to
/// agree out of band.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Topology {
    pub partition_count: u32,
    pub lease_seconds: u64,
    pub stale_threshold_seconds: u64,
    /// Terminal-failure threshold applied to `receptor_failures`: a row
    /// whose attempt count reaches this is marked terminally failed with
    /// `MaxAttemptsExceeded` rather than left claimable for another retry.
    pub max_delivery_attempts: u32,
}

impl From<&crate::config::Config> for Topology {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            partition_count: config.partition_count,
            lease_seconds: config.lease_seconds,
            stale_threshold_seconds: config.stale_threshold_seconds,
            max_delivery_attempts: config.max_delivery_attempts,
        }
    }
}

/// The full input to `process_work_batch`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessWorkBatchRequest {
    pub instance_id: InstanceId,
    pub service_name: String,
    pub host: String,
    pub pid: u32,
    pub metadata: Option<Json>,

    pub outbox_completed_ids: Vec<MessageId>,
    pub outbox_failed: Vec<FailureReport>,
    pub inbox_completed_ids: Vec<MessageId>,
    pub inbox_failed: Vec<FailureReport>,

    pub receptor_completions: Vec<ReceptorOutcome>,
    pub receptor_failures: Vec<ReceptorOutcome>,
    pub perspective_completions: Vec<PerspectiveOutcome>,
    pub perspective_failures: Vec<PerspectiveOutcome>,

    pub new_outbox: Vec<OutboxRecord>,
    pub new_inbox: Vec<InboxRecord>,

    pub renew_outbox_lease_ids: Vec<MessageId>,
    pub renew_inbox_lease_ids: Vec<MessageId>,

    pub flags: CoordinatorFlags,
    pub topology: Topology,
}

impl ProcessWorkBatchRequest {
    /// A request carrying no completions, failures or new work — just the
    /// heartbeat and a claim attempt. The shape every worker-loop tick
    /// starts from before queued operations are merged in.
    pub fn heartbeat_only(instance_id: InstanceId, service_name: impl Into<String>, topology: Topology) -> Self {
        Self {
            instance_id,
            service_name: service_name.into(),
            host: String::new(),
            pid: 0,
            metadata: None,
            outbox_completed_ids: Vec::new(),
            outbox_failed: Vec::new(),
            inbox_completed_ids: Vec::new(),
            inbox_failed: Vec::new(),
            receptor_completions: Vec::new(),
            receptor_failures: Vec::new(),
            perspective_completions: Vec::new(),
            perspective_failures: Vec::new(),
            new_outbox: Vec::new(),
            new_inbox: Vec::new(),
            renew_outbox_lease_ids: Vec::new(),
            renew_inbox_lease_ids: Vec::new(),
            flags: CoordinatorFlags::empty(),
            topology,
        }
    }
}

/// Everything the caller needs to transmit/handle one outbound message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxWork {
    pub message_id: MessageId,
    pub destination: String,
    pub message_type: String,
    pub message_data: Json,
    pub metadata: Json,
    pub scope: Option<Json>,
    pub attempts: u32,
}

/// Everything the caller needs to hand one inbound message to its handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboxWork {
    pub message_id: MessageId,
    pub destination: String,
    pub message_type: String,
    pub message_data: Json,
    pub metadata: Json,
    pub scope: Option<Json>,
    pub attempts: u32,
}

/// The output of `process_work_batch`: the work this caller is now leased
/// to transmit or handle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkBatch {
    pub outbox_work: Vec<OutboxWork>,
    pub inbox_work: Vec<InboxWork>,
}

impl WorkBatch {
    pub fn is_empty(&self) -> bool {
        self.outbox_work.is_empty() && self.inbox_work.is_empty()
    }
}
