//! PostgreSQL-backed durable adapters for `whizbang-core`.
//!
//! Every adapter here implements the same trait contract as its in-memory
//! counterpart in `whizbang-core` (`EventStore`, `Outbox`, `Inbox`,
//! `DeduplicationTable`, `CheckpointStore`, `WorkCoordinator`) against the
//! `wh_`-prefixed schema in `migrations/`. Swapping an in-memory adapter for
//! one of these is the only change a deployment needs to go durable.

pub mod checkpoints;
pub mod coordinator;
pub mod dedup;
pub mod event_store;
pub mod inbox;
pub mod outbox;

pub use checkpoints::PgCheckpointStore;
pub use coordinator::PgWorkCoordinator;
pub use dedup::PgDeduplicationTable;
pub use event_store::PgEventStore;
pub use inbox::PgInbox;
pub use outbox::PgOutbox;

/// Runs the embedded migrations against `pool`. Safe to call on every
/// startup; `sqlx::migrate!` tracks what has already been applied.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
