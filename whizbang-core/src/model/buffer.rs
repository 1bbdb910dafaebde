//! The row shape shared by the outbox and the inbox: both are durable
//! message buffers differing only in role-specific metadata and in which
//! completion bit counts as "done".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::{MessageId, StreamKey};
use crate::status::{FailureReason, StatusFlags};

/// A durable outbound message awaiting publication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub message_id: MessageId,
    pub destination: String,
    pub message_type: String,
    pub message_data: Json,
    pub metadata: Json,
    pub scope: Option<Json>,
    pub stream_id: Option<StreamKey>,
    pub partition_number: Option<u32>,
    pub is_event: bool,
    pub status_flags: StatusFlags,
    pub attempts: u32,
    pub error: Option<String>,
    pub instance_id: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub failure_reason: FailureReason,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Builds a fresh, unclaimed, `Pending` row. `created_at` is supplied by
    /// the caller (usually the coordinator, at the instant of insertion)
    /// rather than read from the system clock here, so callers stay testable
    /// and time always flows from one place.
    pub fn new_pending(
        message_id: MessageId,
        destination: impl Into<String>,
        message_type: impl Into<String>,
        message_data: Json,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            destination: destination.into(),
            message_type: message_type.into(),
            message_data,
            metadata: Json::Null,
            scope: None,
            stream_id: None,
            partition_number: None,
            is_event: false,
            status_flags: StatusFlags::PENDING,
            attempts: 0,
            error: None,
            instance_id: None,
            lease_expiry: None,
            failure_reason: FailureReason::None,
            scheduled_for: None,
            created_at,
            published_at: None,
            processed_at: None,
        }
    }

    /// Claimable iff not terminally failed, not already published, and
    /// either unleased or its lease has expired by `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status_flags.is_claimable_status()
            && self.lease_expiry.map(|expiry| expiry <= now).unwrap_or(true)
    }
}

/// A durable inbound message awaiting handling, with dedup against
/// [`crate::model::dedup::DeduplicationRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboxRecord {
    pub message_id: MessageId,
    pub destination: String,
    pub message_type: String,
    pub message_data: Json,
    pub metadata: Json,
    pub scope: Option<Json>,
    pub stream_id: Option<StreamKey>,
    pub partition_number: Option<u32>,
    pub is_event: bool,
    pub status_flags: StatusFlags,
    pub attempts: u32,
    pub error: Option<String>,
    pub instance_id: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub failure_reason: FailureReason,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub handler_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboxRecord {
    pub fn new_pending(
        message_id: MessageId,
        destination: impl Into<String>,
        message_type: impl Into<String>,
        message_data: Json,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            destination: destination.into(),
            message_type: message_type.into(),
            message_data,
            metadata: Json::Null,
            scope: None,
            stream_id: None,
            partition_number: None,
            is_event: false,
            status_flags: StatusFlags::PENDING,
            attempts: 0,
            error: None,
            instance_id: None,
            lease_expiry: None,
            failure_reason: FailureReason::None,
            scheduled_for: None,
            created_at: received_at,
            published_at: None,
            processed_at: None,
            handler_name: None,
            received_at,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status_flags.is_claimable_status()
            && self.lease_expiry.map(|expiry| expiry <= now).unwrap_or(true)
    }
}
