//! Hand-off of sensor events to the external reactive agent.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{config::NotifyConfig, event::Event};

/// Delivers an event to something outside the daemon.
///
/// Implementations must return immediately; delivery happens elsewhere.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Runs `<binary> system event --text <text> --mode <mode>` on a detached
/// thread per event. Output and exit status are not inspected.
#[derive(Debug, Clone)]
pub struct AgentNotifier {
    binary: PathBuf,
    mode: String,
}

impl AgentNotifier {
    pub fn new(binary: PathBuf, mode: impl Into<String>) -> Self {
        Self {
            binary,
            mode: mode.into(),
        }
    }

    /// Returns `None` when notifications are disabled or the agent binary
    /// cannot be found.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        if !config.enabled {
            info!("Agent notifications disabled by configuration");
            return None;
        }
        match which::which(&config.binary) {
            Ok(binary) => {
                info!("Agent notifications go to {}", binary.display());
                Some(Self::new(binary, config.mode.clone()))
            }
            Err(e) => {
                warn!(
                    "Agent binary '{}' not found ({e}), notifications disabled",
                    config.binary
                );
                None
            }
        }
    }
}

impl Notifier for AgentNotifier {
    fn notify(&self, event: &Event) {
        let text = describe(event);
        let binary = self.binary.clone();
        let mode = self.mode.clone();

        let spawned = thread::Builder::new()
            .name("agent-notify".into())
            .spawn(move || dispatch(&binary, &text, &mode));
        if let Err(e) = spawned {
            warn!("Could not start notification worker: {e}");
        }
    }
}

fn dispatch(binary: &Path, text: &str, mode: &str) {
    let child = Command::new(binary)
        .args(["system", "event", "--text", text, "--mode", mode])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(mut child) => {
            info!("Notified agent: {text}");
            match child.wait() {
                Ok(status) if !status.success() => debug!("Agent exited with {status}"),
                Ok(_) => {}
                Err(e) => debug!("Could not reap agent process: {e}"),
            }
        }
        Err(e) => warn!("Agent dispatch via {} failed: {e}", binary.display()),
    }
}

/// Human-readable summary handed to the agent.
pub fn describe(event: &Event) -> String {
    let mut text = format!(
        "{} sensor: {} at {}.",
        event.module, event.kind, event.timestamp_iso
    );
    if let Some(count) = event.data.get("touch_count") {
        text.push_str(&format!(" Touch count: {count}."));
    }
    if let Some(duration) = event.data.get("duration_ms") {
        text.push_str(&format!(" Duration: {duration}ms."));
    }
    text.push_str(" React to this physically with a face expression and an LCD message.");
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    Idle,
    CooldownActive,
}

/// Per-event-class rate limit for outgoing notifications.
#[derive(Debug)]
pub struct Cooldown {
    interval: Duration,
    last: HashMap<String, Instant>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    pub fn state(&self, class: &str, now: Instant) -> NotifyState {
        match self.last.get(class) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => {
                NotifyState::CooldownActive
            }
            _ => NotifyState::Idle,
        }
    }

    /// Claims a notification slot for `class`. Returns `false` while the
    /// previous one is still cooling down.
    pub fn try_acquire(&mut self, class: &str, now: Instant) -> bool {
        if self.state(class, now) == NotifyState::CooldownActive {
            return false;
        }
        self.last.insert(class.to_string(), now);
        true
    }

    pub fn remaining(&self, class: &str, now: Instant) -> Duration {
        self.last
            .get(class)
            .map(|last| self.interval.saturating_sub(now.saturating_duration_since(*last)))
            .unwrap_or_default()
    }
}
