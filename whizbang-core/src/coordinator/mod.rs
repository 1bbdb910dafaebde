//! The Work Coordinator (C6): the single idempotent batch RPC that
//! registers instance heartbeats, reaps stale instances, persists
//! completions/failures, writes new outbox/inbox rows, extends leases and
//! claims the next batch of work — all as one atomic operation.
//!
//! [`in_memory::InMemoryWorkCoordinator`] is the reference adapter this
//! crate ships; `whizbang-postgres::coordinator` implements the same
//! contract against a real database transaction.

pub mod in_memory;
pub mod strategy;
pub mod types;

pub use in_memory::InMemoryWorkCoordinator;
pub use strategy::{BatchedStrategy, CoordinatorStrategy, ImmediateStrategy};
pub use types::{
    CoordinatorFlags, FailureReport, InboxWork, OutboxWork, PerspectiveOutcome, ProcessWorkBatchRequest,
    ReceptorOutcome, Topology, WorkBatch,
};

use async_trait::async_trait;

use crate::error::CoordinatorError;

/// The batch RPC contract. Implementations must execute the entire
/// algorithm in §4.1 atomically: either every step commits, or none does.
#[async_trait]
pub trait WorkCoordinator: Send + Sync {
    async fn process_work_batch(
        &self,
        request: ProcessWorkBatchRequest,
    ) -> Result<WorkBatch, CoordinatorError>;
}
