//! Thin facade over `whizbang-core` (and, with the `postgres` feature,
//! `whizbang-postgres`): re-exports the pieces application code normally
//! needs plus a [`bootstrap`] helper that wires a coordinator strategy,
//! dispatcher and worker loop into one [`Runtime`] handle with graceful
//! shutdown.

pub mod runtime;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use whizbang_core::checkpoints::{CheckpointStore, InMemoryCheckpointStore};
pub use whizbang_core::config::Config;
pub use whizbang_core::coordinator::{
    BatchedStrategy, CoordinatorStrategy, ImmediateStrategy, InMemoryWorkCoordinator, Topology, WorkCoordinator,
};
pub use whizbang_core::dedup::{DeduplicationTable, InMemoryDeduplicationTable};
pub use whizbang_core::dispatcher::{Dispatcher, HandlerRegistry, LifecycleStage, Receptor};
pub use whizbang_core::envelope::{MessageEnvelope, ServiceInstanceRef};
pub use whizbang_core::execution::{ExecutionStrategy, ParallelExecutor, SerialExecutor};
pub use whizbang_core::ids::{CausationId, CorrelationId, EventId, InstanceId, MessageId, StreamKey};
pub use whizbang_core::metrics::{InMemoryMetrics, MetricsProvider, NoopMetrics};
pub use whizbang_core::worker_loop::{Transport, WorkerLoop};

#[cfg(feature = "postgres")]
pub use whizbang_postgres::{PgCheckpointStore, PgDeduplicationTable, PgEventStore, PgInbox, PgOutbox, PgWorkCoordinator};

pub use runtime::Runtime;
