//! System coordinator for managing service lifecycle and dependency injection.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    drivers,
    notify::{AgentNotifier, Notifier},
    pidfile,
    providers::{
        AppStateProvider, AsyncProvider, EventReactorServiceProvider, IpcServiceProvider,
        ServiceProvider,
    },
    registry::ModuleFactory,
    task_manager::TaskManager,
};

/// Owns the daemon from startup to shutdown.
///
/// Startup order: liveness marker, module discovery and init, socket bind,
/// services. Shutdown reverses it and is safe after a partial startup.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
    pid_file: Option<PathBuf>,
    socket_path: Option<PathBuf>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            shared_state: None,
            service_providers: Vec::new(),
            pid_file: None,
            socket_path: None,
        }
    }

    /// Initializes the daemon with the built-in module list.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        let config = config_manager.get();
        let factories = drivers::builtin(&config.modules, config.effect_join_timeout());
        self.initialize_with(config_manager, factories).await
    }

    pub async fn initialize_with(
        &mut self,
        config_manager: ConfigManager,
        factories: Vec<ModuleFactory>,
    ) -> Result<()> {
        info!("Initializing SystemCoordinator...");
        let config = config_manager.shared();

        pidfile::claim(&config.pid_file).context("Failed to claim the pid file")?;
        self.pid_file = Some(config.pid_file.clone());

        let state = AppStateProvider::new(Arc::clone(&config), factories)
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(Arc::clone(&state));

        self.register_service_providers(state)
            .context("Failed to register service providers")?;

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    fn register_service_providers(&mut self, state: Arc<AppState>) -> Result<()> {
        let ipc = IpcServiceProvider::bind(Arc::clone(&state))?;
        self.socket_path = Some(ipc.path().to_path_buf());

        let notifier = AgentNotifier::from_config(&state.config.notify)
            .map(|n| Arc::new(n) as Arc<dyn Notifier>);

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(ipc),
            Box::new(EventReactorServiceProvider::new(state, notifier)),
        ];
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e:#}",
                        provider.name()
                    );
                }
            }
        }

        if let Some(state) = &self.shared_state {
            info!(
                "Daemon ready. Modules: {:?}, socket: {}",
                state.registry.names(),
                state.config.socket_path.display()
            );
        }
        Ok(())
    }

    /// Waits for SIGINT or SIGTERM, then shuts down.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.shutdown().await.context("Failed to shutdown gracefully")?;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Stops services, releases every module and removes the socket and pid
    /// files. Only what was actually set up is torn down; repeated calls do
    /// nothing.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }
        self.service_providers.clear();

        if let Some(state) = self.shared_state.take() {
            let registry = Arc::clone(&state.registry);
            state
                .module_lock
                .call(move || registry.shutdown())
                .await
                .map_err(|e| anyhow!("module cleanup aborted: {e}"))?;
        }

        for path in [self.socket_path.take(), self.pid_file.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = pidfile::remove(&path) {
                warn!("{e:#}");
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
