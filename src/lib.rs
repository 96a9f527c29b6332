//! # totemd
//!
//! A Linux daemon that owns the Totem device's peripherals (LED face, character
//! LCD, speaker, touch sensor) and exposes them to local clients over a Unix
//! socket speaking newline-delimited JSON.
//!
//! ## Features
//!
//! - **Pluggable modules**: every peripheral implements
//!   [`HardwareModule`](module::HardwareModule); missing hardware is skipped
//! - **Serialized hardware access**: one daemon-wide lock around module calls
//! - **Background effects**: animations, scrolling and playback run on their
//!   own threads and are cancelled by the next command
//! - **Sensor events**: bounded queue, local reaction and a rate-limited
//!   notification to an external agent
//! - **Batches and compound actions** in a single request
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - lifecycle manager
//! - [`ModuleRegistry`](registry::ModuleRegistry) - discovery and teardown
//! - [`CommandRouter`](router::CommandRouter) - request dispatch
//! - [`EventHub`](event::EventHub) - event capture and hand-off
//! - Service providers for the socket server and the event reactor
//!
//! ## Example
//!
//! ```no_run
//! use totemd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None)?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod compound;
pub mod config;
pub mod coordinator;
pub mod drivers;
pub mod effect;
pub mod event;
pub mod logging;
pub mod module;
pub mod notify;
pub mod pidfile;
pub mod protocol;
pub mod providers;
pub mod registry;
pub mod router;
pub mod schema;
pub mod task_manager;

#[cfg(test)]
mod testing;
