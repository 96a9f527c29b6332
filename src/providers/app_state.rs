//! Builds the shared application state: event hub plus initialized modules.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::info;

use crate::{
    app_context::AppState,
    config::Config,
    event::EventHub,
    providers::traits::AsyncProvider,
    registry::{ModuleFactory, ModuleRegistry},
};

/// Runs module discovery and initialization off the async runtime, since
/// both touch hardware synchronously.
pub struct AppStateProvider {
    config: Arc<Config>,
    factories: Mutex<Option<Vec<ModuleFactory>>>,
}

impl AppStateProvider {
    pub fn new(config: Arc<Config>, factories: Vec<ModuleFactory>) -> Self {
        Self {
            config,
            factories: Mutex::new(Some(factories)),
        }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    /// Can only succeed once: the factories are consumed.
    async fn provide(&self) -> Result<Arc<AppState>> {
        let factories = self
            .factories
            .lock()
            .map_err(|_| anyhow!("module factories poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("modules were already initialized"))?;

        let events = EventHub::new(
            self.config.events.capacity,
            self.config.events.triggers.iter().cloned(),
        );

        let hub = Arc::clone(&events);
        let registry = tokio::task::spawn_blocking(move || {
            let mut registry = ModuleRegistry::discover(factories);
            registry.initialize(&hub);
            registry
        })
        .await
        .context("Module initialization aborted")?;

        info!("{} module(s) ready: {:?}", registry.len(), registry.names());
        Ok(Arc::new(AppState::new(
            Arc::clone(&self.config),
            registry,
            events,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubModule;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn builds_state_from_factories() {
        let face = StubModule::new("face");
        let provider = AppStateProvider::new(
            Arc::new(Config::default()),
            vec![
                ModuleFactory::ready(face.clone()),
                ModuleFactory::ready(StubModule::failing_init("lcd")),
            ],
        );

        let state = provider.provide().await.unwrap();
        assert_eq!(state.registry.names(), vec!["face"]);
        assert_eq!(face.inits(), 1);
        assert!(face.sink().is_some());
        assert!(state.events.take_reactions().is_some());
    }

    #[tokio::test]
    async fn second_provide_fails() {
        let provider = AppStateProvider::new(Arc::new(Config::default()), Vec::new());
        provider.provide().await.unwrap();
        assert!(provider.provide().await.is_err());
    }
}
