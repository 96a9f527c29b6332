//! Task management for async service lifecycle.

use std::{collections::HashMap, future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long each service gets to wind down after cancellation.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the daemon's long-running tokio tasks.
///
/// Every task receives a child of the global cancellation token and is
/// expected to return once it fires. `shutdown_all` cancels and joins them
/// with a bounded wait.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    global_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_shutdown_timeout(SHUTDOWN_TIMEOUT)
    }

    pub fn with_shutdown_timeout(shutdown_timeout: Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Spawns and registers a task under `name`.
    pub fn spawn_task<F, Fut>(&mut self, name: impl Into<String>, task_fn: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("Starting task: {task_name}");
            match task_fn(token).await {
                Ok(()) => {
                    info!("Task '{task_name}' completed");
                    Ok(())
                }
                Err(e) => {
                    error!("Task '{task_name}' failed: {e:#}");
                    Err(e)
                }
            }
        });

        if self.tasks.insert(name.clone(), handle).is_some() {
            warn!("Task '{name}' replaced an earlier task with the same name");
        }
        info!("Task '{name}' spawned");
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.global_token.clone()
    }

    /// Cancels every task and waits for each within the shutdown timeout.
    /// Returns the first failure after all tasks have been joined or
    /// abandoned.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for (name, mut handle) in self.tasks.drain() {
            let error = match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => e.context(format!("task '{name}' failed")),
                Ok(Err(e)) => anyhow!("task '{name}' panicked: {e}"),
                Err(_) => {
                    handle.abort();
                    anyhow!("task '{name}' did not stop within {:?}", self.shutdown_timeout)
                }
            };
            warn!("{error:#}");
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[tokio::test]
    async fn cancelled_tasks_stop_cleanly() {
        let mut tasks = TaskManager::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        tasks.spawn_task("waiter", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(tasks.active_count(), 1);
        assert!(tasks.is_running("waiter"));

        tasks.shutdown_all().await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(tasks.active_count(), 0);
    }

    #[tokio::test]
    async fn failing_task_is_reported_at_shutdown() {
        let mut tasks = TaskManager::new();
        tasks.spawn_task("broken", |_token| async { Err(anyhow!("socket gone")) });
        tasks.spawn_task("fine", |token| async move {
            token.cancelled().await;
            Ok(())
        });

        let err = tasks.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("socket gone"));
    }

    #[tokio::test]
    async fn stubborn_task_is_abandoned_after_timeout() {
        let mut tasks = TaskManager::with_shutdown_timeout(Duration::from_millis(50));
        tasks.spawn_task("stubborn", |_token| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let err = tasks.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("did not stop"));
    }

    #[tokio::test]
    async fn global_token_reaches_children() {
        let mut tasks = TaskManager::new();
        let token = tasks.token();
        tasks.spawn_task("child", |child| async move {
            child.cancelled().await;
            Ok(())
        });
        assert!(!token.is_cancelled());
        tasks.shutdown_all().await.unwrap();
        assert!(token.is_cancelled());
    }
}
