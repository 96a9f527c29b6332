//! Application entry point and builder pattern implementation.

use anyhow::{Result, anyhow};
use log::error;

use crate::{config::ConfigManager, coordinator::SystemCoordinator};

/// The daemon as a whole: initialize, serve until signalled, shut down.
///
/// # Example
///
/// ```no_run
/// use totemd::{application::Application, config::ConfigManager};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None)?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle. A failed startup still releases
    /// whatever was already acquired.
    pub async fn run(&mut self) -> Result<()> {
        let started = match self
            .coordinator
            .initialize(self.config_manager.clone())
            .await
        {
            Ok(()) => self.coordinator.start_all_services().await,
            Err(e) => Err(e),
        };

        if let Err(e) = started {
            error!("Startup failed: {e:#}");
            if let Err(cleanup) = self.coordinator.shutdown().await {
                error!("Cleanup after failed startup: {cleanup:#}");
            }
            return Err(e);
        }

        self.coordinator.run_main_loop().await
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
        }
    }

    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    pub fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow!("Configuration manager is required"))?;

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            config_manager,
        })
    }
}
