//! Read-model progress cursors, independent of the inbox/outbox claim path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, StreamKey};
use crate::status::StatusFlags;

/// Tracks how far a named projection has advanced for one stream.
///
/// Invariant: `last_event_id` only ever advances in event-store order; see
/// [`crate::checkpoints::CheckpointStore::record_completion`] for the update
/// rule that enforces this.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerspectiveCheckpoint {
    pub stream_id: StreamKey,
    pub projection_name: String,
    pub last_event_id: Option<EventId>,
    pub status: StatusFlags,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PerspectiveCheckpoint {
    pub fn new(stream_id: StreamKey, projection_name: impl Into<String>) -> Self {
        Self {
            stream_id,
            projection_name: projection_name.into(),
            last_event_id: None,
            status: StatusFlags::empty(),
            processed_at: None,
            error: None,
        }
    }
}
