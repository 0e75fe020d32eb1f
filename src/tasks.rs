//! Child task execution for user callbacks.
//!
//! Every callback runs under a deterministic task ID. The [`TaskLedger`] guarantees that one
//! ID is executed at most once at a time and never again after it completed, which gives the
//! lifecycle and relay operations their exactly-once delivery.

use crate::error::{ForwardtestError, ForwardtestResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying the idempotency key of a task delivered over HTTP.
pub const TASK_ID_HEADER: &str = "x-task-id";

/// Extra lease time on top of the callback timeout before a running claim counts as stale.
pub const CLAIM_GRACE: Duration = Duration::from_secs(30);

/// What happens to a child task when the operation that started it goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentClosePolicy {
    /// Bound to the caller: dropping the caller cancels the callback.
    Terminate,
    /// Detached: the callback runs to completion even if the caller is cancelled.
    Abandon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildTask {
    pub id: String,
    pub task_queue: String,
    pub name: String,
    pub timeout: Duration,
    pub parent_close_policy: ParentClosePolicy,
    pub payload: serde_json::Value,
}

impl ChildTask {
    pub fn new<P: Serialize>(
        id: String,
        task_queue: &str,
        name: &str,
        timeout: Duration,
        parent_close_policy: ParentClosePolicy,
        payload: &P,
    ) -> ForwardtestResult<Self> {
        let payload = serde_json::to_value(payload).map_err(|err| {
            ForwardtestError::InvalidPayload {
                operation: name.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            id,
            task_queue: task_queue.to_string(),
            name: name.to_string(),
            timeout,
            parent_close_policy,
            payload,
        })
    }
}

pub fn init_task_id(id: Uuid) -> String {
    format!("forwardtest-{}-init", id)
}

pub fn exit_task_id(id: Uuid) -> String {
    format!("forwardtest-{}-exit", id)
}

pub fn new_prices_task_id(id: Uuid, time_key: &str) -> String {
    format!("forwardtest-{}-on-new-prices-{}", id, time_key)
}

/// Delivers a task to whatever executes callbacks on its queue.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn execute(&self, task: &ChildTask) -> Result<()>;
}

/// Deduplication record keyed by task ID.
#[async_trait]
pub trait TaskLedger: Send + Sync {
    /// Returns true when the caller now owns `task_id`: the ID was never seen, its last run
    /// failed, or a running claim is older than `lease`.
    async fn claim(&self, task_id: &str, lease: Duration) -> Result<bool>;
    async fn complete(&self, task_id: &str) -> Result<()>;
    /// Marks the claim as failed so a redelivery may claim it again.
    async fn release(&self, task_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct TaskRunner {
    dispatcher: Arc<dyn TaskDispatcher>,
    ledger: Arc<dyn TaskLedger>,
}

impl TaskRunner {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, ledger: Arc<dyn TaskLedger>) -> Self {
        Self { dispatcher, ledger }
    }

    /// Runs `task` and waits for its result. Abandoned tasks are spawned so that they keep
    /// running if this future is dropped.
    pub async fn run_to_completion(&self, task: ChildTask) -> ForwardtestResult<()> {
        match task.parent_close_policy {
            ParentClosePolicy::Terminate => self.execute_once(task).await,
            ParentClosePolicy::Abandon => {
                let runner = self.clone();
                let task_id = task.id.clone();
                tokio::spawn(async move { runner.execute_once(task).await })
                    .await
                    .map_err(|err| ForwardtestError::DownstreamCallback {
                        task_id,
                        reason: format!("callback task aborted: {}", err),
                    })?
            }
        }
    }

    async fn execute_once(&self, task: ChildTask) -> ForwardtestResult<()> {
        let claimed = self
            .ledger
            .claim(&task.id, task.timeout + CLAIM_GRACE)
            .await
            .map_err(ForwardtestError::Store)?;
        if !claimed {
            return Err(ForwardtestError::DuplicateTask(task.id));
        }

        log::debug!(
            "Dispatching {} to {} as {} (timeout {:?})",
            task.name,
            task.task_queue,
            task.id,
            task.timeout
        );
        let outcome = match tokio::time::timeout(task.timeout, self.dispatcher.execute(&task)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{:#}", err)),
            Err(_) => Err(format!("timed out after {:?}", task.timeout)),
        };

        match outcome {
            Ok(()) => {
                if let Err(err) = self.ledger.complete(&task.id).await {
                    log::warn!("Failed to mark task {} as completed: {:#}", task.id, err);
                }
                Ok(())
            }
            Err(reason) => {
                log::warn!("Callback task {} failed: {}", task.id, reason);
                if let Err(err) = self.ledger.release(&task.id).await {
                    log::warn!("Failed to release task {}: {:#}", task.id, err);
                }
                Err(ForwardtestError::DownstreamCallback {
                    task_id: task.id,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTaskLedger;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingDispatcher {
        calls: AtomicU32,
        fail_first: bool,
        delay: Duration,
    }

    #[async_trait]
    impl TaskDispatcher for CountingDispatcher {
        async fn execute(&self, _task: &ChildTask) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_first && call == 0 {
                anyhow::bail!("callback worker unavailable");
            }
            Ok(())
        }
    }

    fn runner(fail_first: bool, delay: Duration) -> (TaskRunner, Arc<CountingDispatcher>) {
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicU32::new(0),
            fail_first,
            delay,
        });
        let runner = TaskRunner::new(dispatcher.clone(), Arc::new(MemoryTaskLedger::new()));
        (runner, dispatcher)
    }

    fn task(policy: ParentClosePolicy, timeout: Duration) -> ChildTask {
        ChildTask::new(
            init_task_id(Uuid::nil()),
            "user-queue",
            "OnInit",
            timeout,
            policy,
            &serde_json::json!({"hello": "world"}),
        )
        .unwrap()
    }

    #[test]
    fn task_ids_are_deterministic() {
        let id = Uuid::nil();
        assert_eq!(
            init_task_id(id),
            "forwardtest-00000000-0000-0000-0000-000000000000-init"
        );
        assert_eq!(
            exit_task_id(id),
            "forwardtest-00000000-0000-0000-0000-000000000000-exit"
        );
        assert_eq!(
            new_prices_task_id(id, "2024-01-01T00:00:00Z"),
            "forwardtest-00000000-0000-0000-0000-000000000000-on-new-prices-2024-01-01T00:00:00Z"
        );
    }

    #[tokio::test]
    async fn completed_tasks_are_not_run_twice() {
        let (runner, dispatcher) = runner(false, Duration::ZERO);
        let timeout = Duration::from_secs(1);
        runner
            .run_to_completion(task(ParentClosePolicy::Terminate, timeout))
            .await
            .unwrap();
        let err = runner
            .run_to_completion(task(ParentClosePolicy::Terminate, timeout))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardtestError::DuplicateTask(_)));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_tasks_can_be_retried() {
        let (runner, dispatcher) = runner(true, Duration::ZERO);
        let timeout = Duration::from_secs(1);
        let err = runner
            .run_to_completion(task(ParentClosePolicy::Abandon, timeout))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardtestError::DownstreamCallback { .. }));

        runner
            .run_to_completion(task(ParentClosePolicy::Abandon, timeout))
            .await
            .unwrap();
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callbacks_time_out() {
        let (runner, _) = runner(false, Duration::from_secs(10));
        let err = runner
            .run_to_completion(task(ParentClosePolicy::Terminate, Duration::from_secs(1)))
            .await
            .unwrap_err();
        match err {
            ForwardtestError::DownstreamCallback { reason, .. } => {
                assert!(reason.contains("timed out"), "unexpected reason {}", reason)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
