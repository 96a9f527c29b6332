use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Builds a component that needs async (or off-thread) initialization.
///
/// # Example
///
/// ```no_run
/// use totemd::providers::traits::AsyncProvider;
///
/// struct Greeting;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for Greeting {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("hello".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// A service started through the [`TaskManager`].
///
/// Providers start in descending `priority`. A critical provider that fails
/// to start aborts startup; any other failure is logged and skipped.
///
/// # Example
///
/// ```no_run
/// use totemd::providers::traits::ServiceProvider;
/// use totemd::task_manager::TaskManager;
///
/// struct Heartbeat;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for Heartbeat {
///     async fn start(&self, task_manager: &mut TaskManager) -> anyhow::Result<()> {
///         task_manager.spawn_task(self.name(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         });
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str { "Heartbeat" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    fn name(&self) -> &'static str;

    /// Higher numbers start first.
    fn priority(&self) -> i32 {
        0
    }

    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use tokio::time::{Duration, sleep};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AsyncProvider<usize> for Counting {
        async fn provide(&self) -> Result<usize> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    struct Refusing;

    #[async_trait]
    impl AsyncProvider<String> for Refusing {
        async fn provide(&self) -> Result<String> {
            Err(anyhow!("device busy"))
        }
    }

    struct Flagging {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ServiceProvider for Flagging {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            let ran = Arc::clone(&self.ran);
            task_manager.spawn_task(self.name(), move |_token| async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Flagging"
        }

        fn priority(&self) -> i32 {
            7
        }

        fn is_critical(&self) -> bool {
            true
        }
    }

    struct Plain;

    #[async_trait]
    impl ServiceProvider for Plain {
        async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
            Err(anyhow!("not today"))
        }

        fn name(&self) -> &'static str {
            "Plain"
        }
    }

    #[tokio::test]
    async fn provider_runs_on_each_call() {
        let provider = Counting {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(provider.provide().await.unwrap(), 1);
        assert_eq!(provider.provide().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let err = Refusing.provide().await.unwrap_err();
        assert_eq!(err.to_string(), "device busy");
    }

    #[tokio::test]
    async fn service_spawns_its_task() {
        let mut task_manager = TaskManager::new();
        let ran = Arc::new(AtomicBool::new(false));
        let service = Flagging {
            ran: Arc::clone(&ran),
        };

        service.start(&mut task_manager).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert!(ran.load(Ordering::SeqCst));
        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn defaults_are_low_priority_and_optional() {
        assert_eq!(Plain.priority(), 0);
        assert!(!Plain.is_critical());
        assert!(Plain.start(&mut TaskManager::new()).await.is_err());
    }

    #[test]
    fn providers_sort_by_descending_priority() {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(Plain),
            Box::new(Flagging {
                ran: Arc::new(AtomicBool::new(false)),
            }),
        ];
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        let names: Vec<_> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["Flagging", "Plain"]);
    }
}
