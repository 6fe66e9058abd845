//! Bounded, observable background tasks.
//!
//! Work that must not hold up a response (avatar refreshes and the like) is
//! spawned here instead of through a bare `tokio::spawn`. Each task races a
//! fixed timeout and a shared shutdown token; whatever happens is logged and
//! counted, so a failure is never silently dropped.

use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a background task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed => "failed",
            TaskOutcome::TimedOut => "timed_out",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone)]
pub struct BackgroundTasks {
    timeout: Duration,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawn `fut` on the runtime. The returned handle may be awaited (tests do)
    /// or dropped; dropping it does not cancel the task.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let timeout = self.timeout;
        let shutdown = self.shutdown.child_token();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => TaskOutcome::Cancelled,
                res = tokio::time::timeout(timeout, fut) => match res {
                    Ok(Ok(())) => TaskOutcome::Completed,
                    Ok(Err(e)) => {
                        tracing::warn!(task = name, error = %format!("{:#}", e), "Background task failed");
                        TaskOutcome::Failed
                    }
                    Err(_) => {
                        tracing::warn!(task = name, timeout_ms = timeout.as_millis() as u64, "Background task timed out");
                        TaskOutcome::TimedOut
                    }
                },
            };

            if outcome == TaskOutcome::Cancelled {
                tracing::info!(task = name, "Background task cancelled by shutdown");
            }

            counter!(
                "background_tasks_total",
                "task" => name,
                "outcome" => outcome.as_str()
            )
            .increment(1);

            outcome
        })
    }

    /// Cancel every in-flight task. New tasks spawned afterwards are cancelled
    /// immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_task() {
        let tasks = BackgroundTasks::new(Duration::from_secs(1));
        let outcome = tasks.spawn("ok", async { Ok(()) }).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn failed_task_is_reported_not_propagated() {
        let tasks = BackgroundTasks::new(Duration::from_secs(1));
        let outcome = tasks
            .spawn("boom", async { Err(anyhow::anyhow!("image host unreachable")) })
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_times_out() {
        let tasks = BackgroundTasks::new(Duration::from_millis(50));
        let outcome = tasks
            .spawn("slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::TimedOut);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_tasks() {
        let tasks = BackgroundTasks::new(Duration::from_secs(60));
        let handle = tasks.spawn("pending", async {
            futures::future::pending::<()>().await;
            Ok(())
        });
        tasks.shutdown();
        assert_eq!(handle.await.unwrap(), TaskOutcome::Cancelled);
    }
}
