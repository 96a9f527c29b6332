//! Configuration management for the totemd daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that selects hardware backends, the command socket, and event handling.

use anyhow::{Context, Result, bail, ensure};
use log::{LevelFilter, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Main configuration structure for the totemd daemon.
///
/// Every field except `version` has a default, so a minimal file is just
/// `version: 1`.
///
/// # Example
///
/// ```yaml
/// version: 1
/// socket_path: /run/totem/totem.sock
/// events:
///   cooldown_secs: 10
/// modules:
///   face:
///     backend: spidev
///     brightness: 64
///   sound:
///     enabled: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Log filter when running in the foreground (`RUST_LOG` still wins).
    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    /// Filesystem path of the command socket.
    #[serde(default = "defaults::socket_path")]
    pub socket_path: PathBuf,

    /// Liveness marker holding the daemon's PID.
    #[serde(default = "defaults::pid_file")]
    pub pid_file: PathBuf,

    /// How long a client may take to send its request.
    #[serde(default = "defaults::client_timeout_secs")]
    pub client_timeout_secs: u64,

    /// Longest accepted request line.
    #[serde(default = "defaults::max_request_bytes")]
    pub max_request_bytes: usize,

    /// Bounded wait when stopping a background effect.
    #[serde(default = "defaults::effect_join_timeout_ms")]
    pub effect_join_timeout_ms: u64,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub modules: ModulesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            log_level: defaults::log_level(),
            socket_path: defaults::socket_path(),
            pid_file: defaults::pid_file(),
            client_timeout_secs: defaults::client_timeout_secs(),
            max_request_bytes: defaults::max_request_bytes(),
            effect_join_timeout_ms: defaults::effect_join_timeout_ms(),
            events: EventsConfig::default(),
            notify: NotifyConfig::default(),
            modules: ModulesConfig::default(),
        }
    }
}

impl Config {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn effect_join_timeout(&self) -> Duration {
        Duration::from_millis(self.effect_join_timeout_ms)
    }

    pub fn log_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse()
            .with_context(|| format!("Invalid log_level '{}'", self.log_level))
    }

    /// Validates ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.version == 1,
            "Unsupported config version {}",
            self.version
        );
        self.log_filter()?;
        ensure!(self.client_timeout_secs > 0, "client_timeout_secs must be > 0");
        ensure!(
            self.max_request_bytes >= 64,
            "max_request_bytes must be at least 64"
        );
        ensure!(
            self.effect_join_timeout_ms > 0,
            "effect_join_timeout_ms must be > 0"
        );
        ensure!(self.events.capacity > 0, "events.capacity must be > 0");

        if self.notify.enabled {
            ensure!(!self.notify.binary.is_empty(), "notify.binary is empty");
            ensure!(!self.notify.mode.is_empty(), "notify.mode is empty");
        }

        let lcd = &self.modules.lcd;
        ensure!((1..=40).contains(&lcd.cols), "modules.lcd.cols must be 1..=40");
        ensure!((1..=4).contains(&lcd.rows), "modules.lcd.rows must be 1..=4");

        let sound = &self.modules.sound;
        ensure!(sound.volume <= 100, "modules.sound.volume must be 0..=100");
        if sound.backend == SoundBackend::Process {
            ensure!(!sound.player.is_empty(), "modules.sound.player is empty");
            ensure!(
                sound.player.iter().any(|arg| arg.contains("{file}")),
                "modules.sound.player must contain a {{file}} placeholder"
            );
        }

        let touch = &self.modules.touch;
        ensure!(
            (50..=2000).contains(&touch.debounce_ms),
            "modules.touch.debounce_ms must be 50..=2000"
        );
        ensure!(
            (1..=1000).contains(&touch.poll_ms),
            "modules.touch.poll_ms must be 1..=1000"
        );

        Ok(())
    }

    /// Applies environment overrides. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("TOTEM_NOTIFY_ENABLED") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.notify.enabled = true,
                "0" | "false" | "no" | "off" => self.notify.enabled = false,
                other => warn!("Ignoring TOTEM_NOTIFY_ENABLED={other}"),
            }
        }
    }
}

/// Sensor event handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Size of the event ring buffer.
    pub capacity: usize,
    /// Minimum gap between two agent notifications of the same event type.
    pub cooldown_secs: u64,
    /// Event types that trigger the reaction and the agent notification.
    pub triggers: Vec<String>,
    /// Also suppress the local reaction while cooling down.
    pub reaction_respects_cooldown: bool,
    pub reaction: ReactionConfig,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            cooldown_secs: 5,
            triggers: vec!["touched".into()],
            reaction_respects_cooldown: false,
            reaction: ReactionConfig::default(),
        }
    }
}

impl EventsConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Immediate local response to a trigger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactionConfig {
    pub expression: String,
    pub line1: String,
    pub line2: String,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            expression: "surprised".into(),
            line1: "I felt that!".into(),
            line2: "Thinking...".into(),
        }
    }
}

/// External agent notified about trigger events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Executable name or path, resolved on `PATH`.
    pub binary: String,
    /// Value of the `--mode` flag.
    pub mode: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "openclaw".into(),
            mode: "now".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    pub face: FaceConfig,
    pub lcd: LcdConfig,
    pub sound: SoundConfig,
    pub touch: TouchConfig,
}

/// 8x8 LED matrix driven by a MAX7219.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub enabled: bool,
    pub backend: FaceBackend,
    pub device: PathBuf,
    pub brightness: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaceBackend {
    Virtual,
    Spidev,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: FaceBackend::Spidev,
            device: PathBuf::from("/dev/spidev0.0"),
            brightness: 128,
        }
    }
}

/// HD44780-style character LCD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LcdConfig {
    pub enabled: bool,
    pub backend: LcdBackend,
    pub device: PathBuf,
    pub cols: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LcdBackend {
    Virtual,
    Charlcd,
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: LcdBackend::Charlcd,
            device: PathBuf::from("/dev/lcd"),
            cols: 16,
            rows: 2,
        }
    }
}

/// Audio playback through an external player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub enabled: bool,
    pub backend: SoundBackend,
    /// Player argv; `{file}` and `{volume}` (0-100) are substituted.
    pub player: Vec<String>,
    /// Master volume, 0-100.
    pub volume: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SoundBackend {
    Virtual,
    Process,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: SoundBackend::Process,
            player: vec!["aplay".into(), "-q".into(), "{file}".into()],
            volume: 80,
        }
    }
}

/// Capacitive touch pad on a GPIO line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    pub enabled: bool,
    pub backend: TouchBackend,
    pub pin: u32,
    pub debounce_ms: u64,
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TouchBackend {
    Virtual,
    Sysfs,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: TouchBackend::Sysfs,
            pin: 17,
            debounce_ms: 200,
            poll_ms: 10,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn socket_path() -> PathBuf {
        PathBuf::from("/tmp/totem.sock")
    }

    pub fn pid_file() -> PathBuf {
        PathBuf::from("/tmp/totem.pid")
    }

    pub fn client_timeout_secs() -> u64 {
        10
    }

    pub fn max_request_bytes() -> usize {
        1024 * 1024
    }

    pub fn effect_join_timeout_ms() -> u64 {
        2000
    }
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("TOTEM_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("totem/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/totem/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

/// Loaded, validated configuration plus the file it came from.
///
/// # Example
///
/// ```no_run
/// use totemd::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # fn example() -> anyhow::Result<()> {
/// // Load from a specific path
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml")))?;
///
/// // Or from the standard locations, falling back to defaults
/// let config_manager = ConfigManager::load(None)?;
/// println!("socket: {}", config_manager.get().socket_path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<Config>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches in the following order:
    /// 1. Provided path parameter
    /// 2. TOTEM_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/totem/config.yml or ~/.config/totem/config.yml
    /// 4. /etc/totem/config.yml
    ///
    /// Without any file the built-in defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(locate_config);

        let mut config = match &path {
            Some(path) => {
                info!("Loading config from: {}", path.display());
                Self::load_config_from_path(path)?
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                Config::default()
            }
        };

        config.apply_overrides(|key| env::var(key).ok());
        config.validate().context("Configuration validation failed")?;

        Ok(Self::new(config, path))
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    /// Shared snapshot for long-lived services.
    pub fn shared(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        if config.version != 1 {
            bail!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            );
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn config_load_valid_yaml() {
        let temp_file = create_temp_config(
            r#"
version: 1
socket_path: /run/totem/totem.sock
client_timeout_secs: 3
events:
  cooldown_secs: 8
  triggers: [touched, released]
notify:
  binary: /usr/local/bin/agent
  mode: later
modules:
  face:
    backend: virtual
    brightness: 32
  lcd:
    backend: virtual
    cols: 20
  sound:
    enabled: false
  touch:
    pin: 4
    debounce_ms: 100
"#,
        );

        let manager = ConfigManager::load(Some(temp_file.path().to_path_buf())).unwrap();
        let config = manager.get();

        assert_eq!(manager.path(), Some(temp_file.path()));
        assert_eq!(config.socket_path, PathBuf::from("/run/totem/totem.sock"));
        assert_eq!(config.client_timeout(), Duration::from_secs(3));
        assert_eq!(config.events.cooldown(), Duration::from_secs(8));
        assert_eq!(config.events.triggers, vec!["touched", "released"]);
        assert_eq!(config.events.capacity, 100);
        assert_eq!(config.notify.mode, "later");
        assert_eq!(config.modules.face.backend, FaceBackend::Virtual);
        assert_eq!(config.modules.face.brightness, 32);
        assert_eq!(config.modules.lcd.cols, 20);
        assert_eq!(config.modules.lcd.rows, 2);
        assert!(!config.modules.sound.enabled);
        assert_eq!(config.modules.touch.pin, 4);
        assert_eq!(config.modules.touch.backend, TouchBackend::Sysfs);
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let temp_file = create_temp_config("version: 1\n");
        let manager = ConfigManager::load(Some(temp_file.path().to_path_buf())).unwrap();
        let mut expected = Config::default();
        expected.apply_overrides(|key| env::var(key).ok());
        assert_eq!(manager.get(), &expected);
    }

    #[test]
    fn missing_version_is_rejected() {
        let temp_file = create_temp_config("socket_path: /tmp/x.sock\n");
        assert!(ConfigManager::load(Some(temp_file.path().to_path_buf())).is_err());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let temp_file = create_temp_config("version: 2\n");
        let err = ConfigManager::load(Some(temp_file.path().to_path_buf())).unwrap_err();
        assert!(format!("{err:#}").contains("Unsupported config version 2"));
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let err = ConfigManager::load(Some(PathBuf::from("/nonexistent/totem.yml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.modules.touch.debounce_ms = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.modules.sound.player = vec!["aplay".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.modules.lcd.rows = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.events.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn virtual_sound_needs_no_player() {
        let mut config = Config::default();
        config.modules.sound.backend = SoundBackend::Virtual;
        config.modules.sound.player.clear();
        config.validate().unwrap();
    }

    #[test]
    fn env_override_toggles_notifications() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "TOTEM_NOTIFY_ENABLED").then(|| "false".into()));
        assert!(!config.notify.enabled);

        config.apply_overrides(|_| Some("ON".into()));
        assert!(config.notify.enabled);

        config.apply_overrides(|_| Some("maybe".into()));
        assert!(config.notify.enabled);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
