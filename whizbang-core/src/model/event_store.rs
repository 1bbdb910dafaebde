//! The append-only per-stream event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::{EventId, StreamKey};

/// One row of the append-only event log. `version` is per-stream and
/// monotonic starting at 0; `sequence_number` is globally monotonic across
/// every stream, so a reader wanting a total order (for diagnostics, not
/// for correctness) can sort on it directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventStoreRecord {
    pub event_id: EventId,
    pub stream_id: StreamKey,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_data: Json,
    pub metadata: Json,
    pub scope: Option<Json>,
    pub sequence_number: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}
