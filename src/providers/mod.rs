//! Service providers started by the coordinator.
//!
//! Each provider owns one long-running concern (the command socket, the event
//! reactor) and spawns it through the [`TaskManager`](crate::task_manager::TaskManager).

pub mod app_state;
pub mod ipc;
pub mod reactor;
pub mod traits;

pub use app_state::AppStateProvider;
pub use ipc::IpcServiceProvider;
pub use reactor::EventReactorServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::{config::Config, registry::ModuleFactory, testing::StubModule};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn daemon_services_are_ordered_and_classified() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            socket_path: dir.path().join("totem.sock"),
            ..Config::default()
        };
        let state = AppStateProvider::new(
            Arc::new(config),
            vec![ModuleFactory::ready(StubModule::new("face"))],
        )
        .provide()
        .await
        .unwrap();

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(EventReactorServiceProvider::new(Arc::clone(&state), None)),
            Box::new(IpcServiceProvider::bind(Arc::clone(&state)).unwrap()),
        ];
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));

        let summary: Vec<_> = providers
            .iter()
            .map(|p| (p.name(), p.priority(), p.is_critical()))
            .collect();
        assert_eq!(
            summary,
            vec![("IpcService", 10, true), ("EventReactor", 5, false)]
        );
    }
}
