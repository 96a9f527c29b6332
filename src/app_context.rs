//! Application state shared by the services.

use std::sync::Arc;

use tokio::{
    sync::Mutex,
    task::{self, JoinError},
};

use crate::{
    compound::ExpressionHold, config::Config, event::EventHub, registry::ModuleRegistry,
};

/// Daemon-wide lock serializing every synchronous call into a module.
///
/// The guard is moved into the blocking task, so it is released only when
/// the module call has returned, even if the awaiting future is dropped.
#[derive(Clone, Default)]
pub struct ModuleLock(Arc<Mutex<()>>);

impl ModuleLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the blocking pool while holding the lock.
    pub async fn call<F, T>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.0).lock_owned().await;
        task::spawn_blocking(move || {
            let _guard = guard;
            f()
        })
        .await
    }
}

/// Shared application state, built once at startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ModuleRegistry>,
    pub module_lock: ModuleLock,
    pub events: Arc<EventHub>,
    /// Revert of the last timed `express`, if one is still pending.
    pub expression_hold: ExpressionHold,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: ModuleRegistry, events: Arc<EventHub>) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            module_lock: ModuleLock::new(),
            events,
            expression_hold: ExpressionHold::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lock_serializes_blocking_calls() {
        let lock = ModuleLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let calls = (0..4).map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tokio::spawn(async move {
                lock.call(move || {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            })
        });

        for call in calls.collect::<Vec<_>>() {
            call.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panics_surface_as_join_errors() {
        let lock = ModuleLock::new();
        let result = lock
            .call(|| {
                let broken = true;
                if broken {
                    panic!("module blew up");
                }
            })
            .await;
        assert!(result.unwrap_err().is_panic());
        lock.call(|| ()).await.unwrap();
    }
}
