//! Module discovery, initialization and teardown.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{error, info, warn};

use crate::{
    event::EventHub,
    module::{HardwareModule, ModuleInfo},
};

type BuildFn = Box<dyn FnOnce() -> anyhow::Result<Arc<dyn HardwareModule>> + Send>;

/// One entry of the static module list. Building must not touch hardware.
pub struct ModuleFactory {
    label: &'static str,
    build: BuildFn,
}

impl ModuleFactory {
    pub fn new<F>(label: &'static str, build: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn HardwareModule>> + Send + 'static,
    {
        Self {
            label,
            build: Box::new(build),
        }
    }

    /// Factory for an already constructed module.
    pub fn ready(module: Arc<dyn HardwareModule>) -> Self {
        Self::new(module.name(), move || Ok(module))
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// Live modules in discovery order.
///
/// Mutation only happens before the registry is shared, so lookups need no
/// synchronization.
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn HardwareModule>>,
    released: AtomicBool,
}

impl ModuleRegistry {
    /// Builds every factory. A failing factory is logged and skipped.
    pub fn discover<I>(factories: I) -> Self
    where
        I: IntoIterator<Item = ModuleFactory>,
    {
        let mut modules: Vec<Arc<dyn HardwareModule>> = Vec::new();

        for factory in factories {
            let label = factory.label;
            let module = match catch_unwind(AssertUnwindSafe(factory.build)) {
                Ok(Ok(module)) => module,
                Ok(Err(e)) => {
                    warn!("Could not load module '{label}': {e:#}");
                    continue;
                }
                Err(_) => {
                    warn!("Loading module '{label}' panicked");
                    continue;
                }
            };

            if modules.iter().any(|m| m.name() == module.name()) {
                warn!("Duplicate module name '{}', skipping", module.name());
                continue;
            }
            info!("Discovered module: {}", module.name());
            modules.push(module);
        }

        Self {
            modules,
            released: AtomicBool::new(false),
        }
    }

    /// Attaches the event upcall and initializes each module in order.
    /// Modules that fail are released and evicted.
    pub fn initialize(&mut self, events: &Arc<EventHub>) {
        let discovered = std::mem::take(&mut self.modules);

        for module in discovered {
            let name = module.name();
            module.attach(events.sink(name));

            match catch_unwind(AssertUnwindSafe(|| module.init())) {
                Ok(Ok(())) => {
                    info!("Initialized module: {name}");
                    self.modules.push(module);
                }
                Ok(Err(e)) => {
                    error!("Failed to initialize module '{name}': {e:#}");
                    release(module.as_ref());
                }
                Err(_) => {
                    error!("Initializing module '{name}' panicked");
                    release(module.as_ref());
                }
            }
        }

        if self.modules.is_empty() {
            warn!("No modules initialized, running headless");
        }
    }

    /// Cleans up every live module once. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for module in &self.modules {
            release(module.as_ref());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HardwareModule>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn list(&self) -> Vec<ModuleInfo> {
        self.modules
            .iter()
            .map(|m| ModuleInfo {
                name: m.name(),
                description: m.description(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn HardwareModule>> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn release(module: &dyn HardwareModule) {
    match catch_unwind(AssertUnwindSafe(|| module.cleanup())) {
        Ok(()) => info!("Cleaned up module: {}", module.name()),
        Err(_) => warn!("Cleanup of module '{}' panicked", module.name()),
    }
}
