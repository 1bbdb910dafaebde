//! Per-dispatch context: identifies the current stage and service instance,
//! and collects messages handlers choose to emit.

use parking_lot::Mutex;
use serde_json::Value as Json;

use super::LifecycleStage;
use crate::envelope::ServiceInstanceRef;
use crate::ids::{CausationId, CorrelationId, MessageId, StreamKey};
use crate::model::OutboxRecord;

/// Passed to every handler invocation. Handlers read the current stage from
/// it and use [`DispatchContext::emit`] to queue an outbound message without
/// reaching for the coordinator strategy directly — that wiring happens
/// once the pipeline finishes, in the worker loop. Every message emitted
/// this way is stamped with the correlation/causation ids of the envelope
/// currently being handled, per the propagation rule handlers must not have
/// to reimplement themselves.
pub struct DispatchContext {
    service_instance: ServiceInstanceRef,
    stage: LifecycleStage,
    correlation_id: CorrelationId,
    causation_id: CausationId,
    emitted: Mutex<Vec<OutboxRecord>>,
}

impl DispatchContext {
    /// `message_id` is the id of the envelope currently being dispatched:
    /// any message emitted during this stage was caused by it, so it
    /// becomes the emitted messages' causation id directly, rather than
    /// being re-derived from a hop field one step removed from the
    /// envelope itself.
    pub(crate) fn new(
        service_instance: ServiceInstanceRef,
        stage: LifecycleStage,
        correlation_id: CorrelationId,
        message_id: MessageId,
    ) -> Self {
        Self {
            service_instance,
            stage,
            correlation_id,
            causation_id: CausationId::from_external(message_id.as_uuid()),
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub fn service_instance(&self) -> &ServiceInstanceRef {
        &self.service_instance
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    /// Queues a new outbound message, its `metadata` stamped with the
    /// current envelope's correlation id (inherited unchanged) and
    /// causation id (the current envelope's own message id) so the chain
    /// survives the outbox round trip into whatever inbox receives it next.
    pub fn emit(
        &self,
        destination: impl Into<String>,
        message_type: impl Into<String>,
        message_data: Json,
        stream_id: Option<StreamKey>,
    ) -> MessageId {
        let message_id = MessageId::generate();
        let mut record = OutboxRecord::new_pending(
            message_id,
            destination,
            message_type,
            message_data,
            chrono::Utc::now(),
        );
        record.stream_id = stream_id;
        record.metadata = serde_json::json!({
            "correlation_id": self.correlation_id,
            "causation_id": self.causation_id,
        });
        self.emitted.lock().push(record);
        message_id
    }

    pub(crate) fn into_emitted(self) -> Vec<OutboxRecord> {
        self.emitted.into_inner()
    }
}
