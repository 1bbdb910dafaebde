//! Error taxonomy shared by the coordinator, event store, outbox/inbox and
//! dispatcher. Each enum below maps one-to-one onto a row of the recovery
//! table in the error-handling design section of the specification: the
//! variant name is also the thing an operator greps for in logs.

use thiserror::Error;

use crate::dispatcher::LifecycleStage;
use crate::status::FailureReason;

/// Errors surfaced by [`crate::coordinator::WorkCoordinator::process_work_batch`].
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("database transaction failed: {0}")]
    Transaction(String),

    /// The transaction was rolled back due to a serialization failure or
    /// deadlock; the caller should retry the whole RPC, which is safe
    /// because every input is idempotent.
    #[error("transaction aborted, retry the whole batch: {0}")]
    Aborted(String),

    #[error("cancelled before commit")]
    Cancelled,
}

/// Errors from [`crate::event_store::EventStore`] operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("stream {stream_id} already has version {version}")]
    VersionConflict { stream_id: String, version: u64 },

    #[error("exhausted {attempts} retries appending to stream {stream_id}")]
    RetriesExhausted { stream_id: String, attempts: u32 },

    #[error("stream {0} not found")]
    StreamNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from [`crate::outbox::Outbox`] / [`crate::inbox::Inbox`] operations.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("message {0} already present (deduplicated)")]
    Duplicate(String),

    #[error("message {0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// A processing failure, carrying enough detail for the coordinator to set
/// `failure_reason` and the terminal-failure bit correctly.
#[derive(Debug, Error)]
#[error("{reason:?}: {message}")]
pub struct ProcessingFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl ProcessingFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureReason::TransportException, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureReason::ValidationError, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(FailureReason::SerializationError, message)
    }
}

/// Errors raised while driving an envelope through the lifecycle pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("stage {stage:?} failed: {source}")]
    StageFailed {
        stage: LifecycleStage,
        #[source]
        source: ProcessingFailure,
    },

    #[error("no handler registered for stage {0:?}")]
    NoHandler(LifecycleStage),

    #[error("executor rejected the envelope: {0}")]
    ExecutorRejected(String),
}

impl DispatchError {
    /// The stage that failed, if this variant carries one.
    pub fn stage(&self) -> Option<LifecycleStage> {
        match self {
            DispatchError::StageFailed { stage, .. } => Some(*stage),
            DispatchError::NoHandler(stage) => Some(*stage),
            DispatchError::ExecutorRejected(_) => None,
        }
    }

    /// The [`FailureReason`] an operator should see recorded against the
    /// envelope, derived from the underlying cause when available.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            DispatchError::StageFailed { source, .. } => source.reason,
            DispatchError::NoHandler(_) => FailureReason::Unknown,
            DispatchError::ExecutorRejected(_) => FailureReason::Unknown,
        }
    }
}
