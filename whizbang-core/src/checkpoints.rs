//! Perspective checkpoint storage: read-model progress cursors that advance
//! independently of the main inbox/outbox claim path.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::ids::{EventId, StreamKey};
use crate::model::PerspectiveCheckpoint;
use crate::status::StatusFlags;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, stream_id: StreamKey, projection_name: &str) -> Option<PerspectiveCheckpoint>;

    /// Applies a projection-completion payload. If `status` carries
    /// `CATCHING_UP` going in and `COMPLETED` coming out of this update, the
    /// `CATCHING_UP` bit is cleared — matching the coordinator's rule that
    /// completing catch-up work retires the catch-up flag.
    async fn record_completion(
        &self,
        stream_id: StreamKey,
        projection_name: &str,
        last_event_id: EventId,
        status: StatusFlags,
        error: Option<String>,
    ) -> PerspectiveCheckpoint;
}

pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<(StreamKey, String), PerspectiveCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, stream_id: StreamKey, projection_name: &str) -> Option<PerspectiveCheckpoint> {
        self.checkpoints
            .read()
            .get(&(stream_id, projection_name.to_string()))
            .cloned()
    }

    async fn record_completion(
        &self,
        stream_id: StreamKey,
        projection_name: &str,
        last_event_id: EventId,
        mut status: StatusFlags,
        error: Option<String>,
    ) -> PerspectiveCheckpoint {
        let key = (stream_id, projection_name.to_string());
        let mut checkpoints = self.checkpoints.write();
        let existing = checkpoints.get(&key);

        let was_catching_up = existing
            .map(|c| c.status.contains(StatusFlags::CATCHING_UP))
            .unwrap_or(false);
        if was_catching_up && status.contains(StatusFlags::COMPLETED) {
            status.remove(StatusFlags::CATCHING_UP);
        }

        let checkpoint = PerspectiveCheckpoint {
            stream_id,
            projection_name: projection_name.to_string(),
            last_event_id: Some(last_event_id),
            status,
            processed_at: Some(Utc::now()),
            error,
        };
        checkpoints.insert(key, checkpoint.clone());
        checkpoint
    }
}
