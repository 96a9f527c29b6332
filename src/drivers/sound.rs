//! Audio playback through an external player.

pub mod player;

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::Context;
use log::{info, warn};
use serde_json::{Value, json};

use crate::{
    config::{SoundBackend, SoundConfig},
    effect::{EffectSlot, StopSignal},
    module::{HardwareModule, ModuleError},
    protocol::Response,
    schema::{ActionSpec, ParamKind, ParamSpec, Params},
};

use player::{Playback, Player, ProcessPlayer, VirtualPlayer};

const NAME: &str = "sound";
/// How often a running pass is checked for exit or cancellation.
const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct SoundStatus {
    volume: u8,
    current_file: Option<String>,
}

pub struct SoundModule {
    player: Arc<dyn Player>,
    status: Mutex<SoundStatus>,
    effects: EffectSlot,
}

impl SoundModule {
    pub fn new(player: Arc<dyn Player>, volume: u8, join_timeout: Duration) -> Self {
        Self {
            player,
            status: Mutex::new(SoundStatus {
                volume,
                current_file: None,
            }),
            effects: EffectSlot::new(NAME, join_timeout),
        }
    }

    pub fn from_config(config: &SoundConfig, join_timeout: Duration) -> Self {
        let player: Arc<dyn Player> = match config.backend {
            SoundBackend::Virtual => Arc::new(VirtualPlayer::default()),
            SoundBackend::Process => Arc::new(ProcessPlayer::new(config.player.clone())),
        };
        Self::new(player, config.volume, join_timeout)
    }

    fn status(&self) -> MutexGuard<'_, SoundStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self, action: &str, params: &Params) -> Result<Value, ModuleError> {
        match action {
            "play" => {
                let file = params.str("file")?;
                if !Path::new(file).is_file() {
                    return Err(ModuleError::Invalid(format!("File not found: {file}")));
                }
                let volume = match params.get("volume").and_then(Value::as_f64) {
                    Some(level) => level,
                    None => f64::from(self.status().volume) / 100.0,
                };
                let repeat = params.bool_or("loop", false)?;

                let player = Arc::clone(&self.player);
                let path = PathBuf::from(file);
                let percent = (volume * 100.0).round() as u8;

                self.effects.stop();
                let first = self.player.spawn(&path, percent)?;
                hand_off(
                    first,
                    |worker| self.effects.start("playback", worker),
                    move |first, stop| {
                        play(player.as_ref(), first, &path, percent, repeat, &stop)
                    },
                )?;
                self.status().current_file = Some(file.to_string());
                Ok(json!({ "file": file, "volume": volume, "looping": repeat }))
            }
            "stop" => {
                self.effects.stop();
                self.status().current_file = None;
                Ok(Value::Null)
            }
            "volume" => {
                let level = params.int("level")? as u8;
                self.status().volume = level;
                Ok(json!({ "volume": level }))
            }
            _ => Err(ModuleError::UnknownAction {
                module: NAME.into(),
                action: action.into(),
            }),
        }
    }
}

type Worker = Box<dyn FnOnce(StopSignal) + Send>;

/// Gives `first` to the worker launched by `start`. If the worker never
/// starts, `first` is killed instead of being left to play unattended.
fn hand_off<S, R>(first: Box<dyn Playback>, start: S, run: R) -> io::Result<()>
where
    S: FnOnce(Worker) -> io::Result<()>,
    R: FnOnce(Box<dyn Playback>, StopSignal) + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(first)));
    let handed = Arc::clone(&slot);
    let started = start(Box::new(move |stop| {
        if let Some(pass) = take_pass(&handed) {
            run(pass, stop);
        }
    }));

    if started.is_err() {
        if let Some(mut pass) = take_pass(&slot) {
            if let Err(e) = pass.kill() {
                warn!("Could not stop the orphaned player: {e}");
            }
        }
    }
    started
}

fn take_pass(slot: &Mutex<Option<Box<dyn Playback>>>) -> Option<Box<dyn Playback>> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// Waits out `pass`, respawning it while `repeat` holds. The player is
/// killed on stop.
fn play(
    player: &dyn Player,
    mut pass: Box<dyn Playback>,
    file: &Path,
    volume: u8,
    repeat: bool,
    stop: &StopSignal,
) {
    loop {
        loop {
            if stop.wait_timeout(POLL) {
                if let Err(e) = pass.kill() {
                    warn!("Could not stop the player: {e}");
                }
                return;
            }
            match pass.finished() {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!("Lost track of the player: {e}");
                    return;
                }
            }
        }

        if !repeat {
            return;
        }
        pass = match player.spawn(file, volume) {
            Ok(pass) => pass,
            Err(e) => {
                warn!("Could not restart playback of {}: {e}", file.display());
                return;
            }
        };
    }
}

impl HardwareModule for SoundModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Audio file playback with volume control and looping"
    }

    fn init(&self) -> anyhow::Result<()> {
        self.player
            .probe()
            .context("Audio player is not available")?;
        info!("Sound ready at volume {}", self.status().volume);
        Ok(())
    }

    fn cleanup(&self) {
        self.effects.stop();
    }

    fn handle_command(&self, action: &str, params: &Params) -> Response {
        Response::from_result(self.run(action, params))
    }

    fn state(&self) -> Result<Value, ModuleError> {
        let status = self.status().clone();
        let playing = self.effects.is_running();
        Ok(json!({
            "volume": status.volume,
            "playing": playing,
            "current_file": if playing { status.current_file } else { None },
        }))
    }

    fn capabilities(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("play", "Play an audio file in the background")
                .param(
                    "file",
                    ParamSpec::required(ParamKind::Str).describe("Absolute path to the audio file"),
                )
                .param(
                    "volume",
                    ParamSpec::optional(ParamKind::Float)
                        .range(0.0, 1.0)
                        .describe("Playback volume; defaults to the master volume"),
                )
                .param(
                    "loop",
                    ParamSpec::with_default(ParamKind::Bool, false).describe("Repeat until stopped"),
                ),
            ActionSpec::new("stop", "Stop playback"),
            ActionSpec::new("volume", "Set the master volume for later playback").param(
                "level",
                ParamSpec::required(ParamKind::Int)
                    .range(0.0, 100.0)
                    .describe("Percent"),
            ),
        ]
    }
}
