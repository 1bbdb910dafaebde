//! Execution strategies: the serial (strict FIFO) and parallel (worker
//! pool) ways an executor can run the work a dispatcher hands it.

mod parallel;
mod serial;

pub use parallel::ParallelExecutor;
pub use serial::SerialExecutor;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::error::ProcessingFailure;

/// A unit of work submitted to an executor. Boxed because `Serial` and
/// `Parallel` both need to hold heterogeneous futures in the same channel.
pub type Task = Pin<Box<dyn Future<Output = Result<(), ProcessingFailure>> + Send>>;

/// Why `execute` rejected or could not complete a task.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("executor is not running")]
    NotRunning,

    #[error("executor was stopped before this task completed")]
    Stopped,

    #[error("the task itself failed: {0}")]
    TaskFailed(#[from] ProcessingFailure),
}

/// `ExecuteAsync`/`StartAsync`/`StopAsync`/`DrainAsync`, common to the
/// serial and parallel executors. Both share the same
/// `NotStarted -> Running -> Stopped` state machine; restart from `Stopped`
/// is rejected and start/stop are idempotent.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Submits `task` and awaits its completion, propagating whatever
    /// failure the task produced rather than swallowing it.
    async fn execute(&self, task: Task) -> Result<(), ExecutionError>;

    /// Idempotent: calling `start` while already running is a no-op.
    async fn start(&self) -> Result<(), ExecutionError>;

    /// Idempotent: calling `stop` while already stopped is a no-op. After
    /// `stop`, further `execute` calls are rejected with
    /// [`ExecutionError::NotRunning`].
    async fn stop(&self) -> Result<(), ExecutionError>;

    /// Completes once every task submitted before the call resolves.
    async fn drain(&self) -> Result<(), ExecutionError>;
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl From<u8> for Phase {
    fn from(value: u8) -> Self {
        match value {
            0 => Phase::NotStarted,
            1 => Phase::Running,
            _ => Phase::Stopped,
        }
    }
}

/// The `NotStarted -> Running -> Stopped` state machine shared by both
/// executors, factored out so each only has to implement the transition
/// rules once.
pub(crate) struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Phase::NotStarted as u8))
    }

    pub(crate) fn is_running(&self) -> bool {
        Phase::from(self.0.load(Ordering::SeqCst)) == Phase::Running
    }

    /// Transitions `NotStarted -> Running`. A no-op if already `Running`.
    /// Returns an error only if the executor was already stopped.
    pub(crate) fn start(&self) -> Result<(), ExecutionError> {
        match Phase::from(self.0.load(Ordering::SeqCst)) {
            Phase::NotStarted => {
                self.0.store(Phase::Running as u8, Ordering::SeqCst);
                Ok(())
            }
            Phase::Running => Ok(()),
            Phase::Stopped => Err(ExecutionError::Stopped),
        }
    }

    /// Transitions to `Stopped` from any state. Idempotent.
    pub(crate) fn stop(&self) {
        self.0.store(Phase::Stopped as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_after_stop_is_rejected() {
        let state = LifecycleState::new();
        state.start().unwrap();
        state.stop();
        assert!(matches!(state.start(), Err(ExecutionError::Stopped)));
    }

    #[test]
    fn start_is_idempotent() {
        let state = LifecycleState::new();
        state.start().unwrap();
        state.start().unwrap();
        assert!(state.is_running());
    }
}
