//! Ephemeral ownership records: which instance is alive, which partition it
//! owns, and which stream it currently holds a lease on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::StreamKey;

/// A stream's current lease holder. `assigned_instance_id = None` means the
/// stream is orphaned and claimable by any instance owning its partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveStreamRecord {
    pub stream_id: StreamKey,
    pub partition_number: u32,
    pub assigned_instance_id: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ActiveStreamRecord {
    pub fn is_orphaned(&self, now: DateTime<Utc>) -> bool {
        self.assigned_instance_id.is_none()
            || self.lease_expiry.map(|expiry| expiry <= now).unwrap_or(false)
    }
}

/// A registered, (hopefully) live process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_name: String,
    pub host_name: String,
    pub process_id: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub metadata: Option<Json>,
}

impl ServiceInstance {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold_seconds: i64) -> bool {
        (now - self.last_heartbeat_at).num_seconds() > stale_threshold_seconds
    }
}

/// Deterministic load-balanced mapping of a partition to its current owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub partition_number: u32,
    pub instance_id: String,
    pub assigned_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}
