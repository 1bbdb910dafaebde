//! A single worker consuming tasks in strict FIFO order.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{ExecutionError, ExecutionStrategy, LifecycleState, Task};

struct QueueItem {
    task: Task,
    completion: oneshot::Sender<Result<(), ExecutionError>>,
}

enum Sender {
    Bounded(mpsc::Sender<QueueItem>),
    Unbounded(mpsc::UnboundedSender<QueueItem>),
}

impl Sender {
    async fn send(&self, item: QueueItem) -> Result<(), QueueItem> {
        match self {
            Sender::Bounded(tx) => tx.send(item).await.map_err(|e| e.0),
            Sender::Unbounded(tx) => tx.send(item).map_err(|e| e.0),
        }
    }
}

/// Preserves strict FIFO order per executor. `channel_capacity = Some(n)`
/// makes `execute` block the caller once `n` tasks are queued
/// (backpressure); `None` is unbounded. `stop` drops the sending half so the
/// worker drains whatever is already queued and then exits; `drain` awaits
/// that exit.
pub struct SerialExecutor {
    sender: Mutex<Option<Sender>>,
    state: LifecycleState,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SerialExecutor {
    pub fn new(channel_capacity: Option<usize>) -> Self {
        let (sender, worker) = match channel_capacity {
            Some(capacity) => {
                let (tx, mut rx) = mpsc::channel(capacity.max(1));
                let worker = tokio::spawn(async move {
                    while let Some(item) = rx.recv().await {
                        run_item(item).await;
                    }
                });
                (Sender::Bounded(tx), worker)
            }
            None => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let worker = tokio::spawn(async move {
                    while let Some(item) = rx.recv().await {
                        run_item(item).await;
                    }
                });
                (Sender::Unbounded(tx), worker)
            }
        };

        Self {
            sender: Mutex::new(Some(sender)),
            state: LifecycleState::new(),
            worker: Mutex::new(Some(worker)),
        }
    }
}

async fn run_item(item: QueueItem) {
    let outcome = item.task.await.map_err(ExecutionError::TaskFailed);
    let _ = item.completion.send(outcome);
}

#[async_trait]
impl ExecutionStrategy for SerialExecutor {
    async fn execute(&self, task: Task) -> Result<(), ExecutionError> {
        if !self.state.is_running() {
            return Err(ExecutionError::NotRunning);
        }
        let (completion, receiver) = oneshot::channel();
        let item = QueueItem { task, completion };
        let sender = self.sender.lock().await;
        match sender.as_ref() {
            Some(sender) => sender.send(item).await.map_err(|_| ExecutionError::NotRunning)?,
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
        self.sender.lock().await.take();
        Ok(())
    }

    async fn drain(&self) -> Result<(), ExecutionError> {
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn executes_tasks_in_fifo_order() {
        let executor = SerialExecutor::new(None);
        executor.start().await.unwrap();

        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..10u32 {
            let order = order.clone();
            let delay = (9 - i) % 5;
            let task: Task = Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
                order.lock().await.push(i);
                Ok(())
            });
            handles.push(executor.execute(task));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn execute_before_start_is_rejected() {
        let executor = SerialExecutor::new(None);
        let task: Task = Box::pin(async { Ok(()) });
        let result = executor.execute(task).await;
        assert!(matches!(result, Err(ExecutionError::NotRunning)));
    }

    #[tokio::test]
    async fn handler_failure_propagates_to_the_caller() {
        let executor = SerialExecutor::new(None);
        executor.start().await.unwrap();

        let task: Task = Box::pin(async {
            Err(crate::error::ProcessingFailure::validation("bad input"))
        });
        let result = executor.execute(task).await;
        assert!(matches!(result, Err(ExecutionError::TaskFailed(_))));
    }

    #[tokio::test]
    async fn bounded_capacity_one_serializes_two_producers() {
        let executor = Arc::new(SerialExecutor::new(Some(1)));
        executor.start().await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = counter.clone();
        let e1 = executor.clone();
        let first = tokio::spawn(async move {
            let task: Task = Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            e1.execute(task).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let c2 = counter.clone();
        let e2 = executor.clone();
        let second = tokio::spawn(async move {
            let task: Task = Box::pin(async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            e2.execute(task).await
        });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
