//! A fixed-size worker pool consuming the same task channel; ordering is
//! not preserved across workers, only within whatever happens to land on
//! the same one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::{ExecutionError, ExecutionStrategy, LifecycleState, Task};

struct QueueItem {
    task: Task,
    cancel: CancellationToken,
    completion: oneshot::Sender<Result<(), ExecutionError>>,
}

/// `pool_size` workers pull from one shared channel. `stop` closes the
/// channel so idle workers exit once it drains; `drain` awaits every
/// worker's exit. Cancelling the token passed to a still-queued task causes
/// it to resolve as [`ExecutionError::Stopped`] without running the task body.
pub struct ParallelExecutor {
    sender: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    state: LifecycleState,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    cancellation: CancellationToken,
}

impl ParallelExecutor {
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let cancellation = CancellationToken::new();

        let mut workers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match item {
                        Some(item) => run_item(item).await,
                        None => break,
                    }
                }
            }));
        }

        Self {
            sender: Mutex::new(Some(tx)),
            state: LifecycleState::new(),
            workers: Mutex::new(workers),
            cancellation,
        }
    }
}

async fn run_item(item: QueueItem) {
    if item.cancel.is_cancelled() {
        let _ = item.completion.send(Err(ExecutionError::Stopped));
        return;
    }
    let outcome = tokio::select! {
        result = item.task => result.map_err(ExecutionError::TaskFailed),
        _ = item.cancel.cancelled() => Err(ExecutionError::Stopped),
    };
    let _ = item.completion.send(outcome);
}

#[async_trait]
impl ExecutionStrategy for ParallelExecutor {
    async fn execute(&self, task: Task) -> Result<(), ExecutionError> {
        if !self.state.is_running() {
            return Err(ExecutionError::NotRunning);
        }
        let (completion, receiver) = oneshot::channel();
        let item = QueueItem {
            task,
            cancel: self.cancellation.clone(),
            completion,
        };
        let sender = self.sender.lock().await;
        match sender.as_ref() {
            Some(sender) => sender.send(item).map_err(|_| ExecutionError::NotRunning)?,
            None => return Err(ExecutionError::NotRunning),
        }
        drop(sender);
        receiver.await.unwrap_or(Err(ExecutionError::Stopped))
    }

    async fn start(&self) -> Result<(), ExecutionError> {
        self.state.start()
    }

    async fn stop(&self) -> Result<(), ExecutionError> {
        self.state.stop();
        self.cancellation.cancel();
        self.sender.lock().await.take();
        Ok(())
    }

    async fn drain(&self) -> Result<(), ExecutionError> {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_tasks_across_the_pool() {
        let executor = Arc::new(ParallelExecutor::new(4));
        executor.start().await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let executor = executor.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let task: Task = Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                executor.execute(task).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn stop_then_drain_waits_for_in_flight_work() {
        let executor = Arc::new(ParallelExecutor::new(2));
        executor.start().await.unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();
        let e = executor.clone();
        let in_flight = tokio::spawn(async move {
            let task: Task = Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            e.execute(task).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        executor.stop().await.unwrap();

        let task: Task = Box::pin(async { Ok(()) });
        assert!(matches!(
            executor.execute(task).await,
            Err(ExecutionError::NotRunning)
        ));

        in_flight.await.unwrap().unwrap();
        executor.drain().await.unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }
}
