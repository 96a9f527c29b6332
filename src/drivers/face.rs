//! 8x8 LED matrix face.

pub mod device;
pub mod expressions;
pub mod frame;
pub mod protocol;

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{info, warn};
use serde_json::{Value, json};

use crate::{
    config::{FaceBackend, FaceConfig},
    effect::EffectSlot,
    module::{HardwareModule, ModuleError},
    protocol::Response,
    schema::{ActionSpec, ParamKind, ParamSpec, Params},
};

use device::{MatrixDevice, SpidevMatrix, VirtualMatrix};
use expressions::{Animation, Clock};
use frame::Frame;

const NAME: &str = "face";
const COORD_MAX: f64 = (frame::SIZE - 1) as f64;

struct Panel {
    device: Box<dyn MatrixDevice>,
    buffer: Frame,
}

impl Panel {
    fn show(&mut self, frame: Frame) -> io::Result<()> {
        self.buffer = frame;
        self.device.display(&frame)
    }

    fn flush(&mut self) -> io::Result<()> {
        let frame = self.buffer;
        self.device.display(&frame)
    }

    fn edit(&mut self, flush: bool, draw: impl FnOnce(&mut Frame)) -> io::Result<()> {
        draw(&mut self.buffer);
        if flush { self.flush() } else { Ok(()) }
    }
}

#[derive(Debug, Clone, Default)]
struct FaceStatus {
    expression: Option<String>,
    brightness: u8,
}

pub struct FaceModule {
    panel: Arc<Mutex<Panel>>,
    status: Mutex<FaceStatus>,
    effects: EffectSlot,
}

impl FaceModule {
    pub fn new(device: Box<dyn MatrixDevice>, brightness: u8, join_timeout: Duration) -> Self {
        Self {
            panel: Arc::new(Mutex::new(Panel {
                device,
                buffer: Frame::BLANK,
            })),
            status: Mutex::new(FaceStatus {
                expression: None,
                brightness,
            }),
            effects: EffectSlot::new(NAME, join_timeout),
        }
    }

    pub fn from_config(config: &FaceConfig, join_timeout: Duration) -> Self {
        let device: Box<dyn MatrixDevice> = match config.backend {
            FaceBackend::Virtual => Box::new(VirtualMatrix::default()),
            FaceBackend::Spidev => Box::new(SpidevMatrix::new(&config.device)),
        };
        Self::new(device, config.brightness, join_timeout)
    }

    fn panel(&self) -> MutexGuard<'_, Panel> {
        lock(&self.panel)
    }

    fn status(&self) -> MutexGuard<'_, FaceStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_expression(&self, expression: Option<&str>) {
        self.status().expression = expression.map(str::to_string);
    }

    /// Runs `play` on the effect thread, drawing straight to the panel.
    fn start_effect<F>(&self, label: &'static str, limit: Duration, play: F) -> Result<(), ModuleError>
    where
        F: FnOnce(&Clock, &mut dyn FnMut(Frame) -> io::Result<()>) -> io::Result<()>
            + Send
            + 'static,
    {
        let panel = Arc::clone(&self.panel);
        self.effects.start(label, move |stop| {
            let clock = Clock::new(stop, limit);
            if let Err(e) = play(&clock, &mut |frame| lock(&panel).show(frame)) {
                warn!("face effect '{label}' aborted: {e}");
            }
        })?;
        Ok(())
    }

    fn run(&self, action: &str, params: &Params) -> Result<Value, ModuleError> {
        match action {
            "expression" => {
                let name = params.str("name")?;
                let frame = expressions::expression(name).ok_or_else(|| {
                    ModuleError::Invalid(format!(
                        "Unknown expression '{name}'. Available: {}",
                        expressions::expression_names().collect::<Vec<_>>().join(", ")
                    ))
                })?;
                self.effects.stop();
                self.panel().show(frame)?;
                self.set_expression(Some(name));
                Ok(json!({ "expression": name }))
            }
            "animate" => {
                let name = params.str("name")?;
                let animation = Animation::from_name(name).ok_or_else(|| {
                    ModuleError::Invalid(format!("Unknown animation '{name}'"))
                })?;
                let duration = params.float_or("duration", 0.0)?;
                let limit = Duration::from_secs_f64(duration);

                self.set_expression(None);
                self.start_effect(animation.name(), limit, move |clock, show| {
                    animation.play(clock, show)
                })?;
                Ok(json!({ "animation": animation.name(), "duration": duration }))
            }
            "stop" => Ok(json!({ "stopped": self.effects.stop() })),
            "blink" => {
                let hold = Duration::from_millis(params.int_or("duration_ms", 150)? as u64);
                self.effects.stop();
                let saved = self.panel().buffer;
                self.panel().show(expressions::BLINK)?;
                std::thread::sleep(hold);
                self.panel().show(saved)?;
                Ok(Value::Null)
            }
            "custom" => {
                let frame = Frame::from_grid(params.get("grid").unwrap_or(&Value::Null))?;
                self.effects.stop();
                self.panel().show(frame)?;
                self.set_expression(Some("custom"));
                Ok(json!({ "expression": "custom" }))
            }
            "pixel" => {
                let (x, y) = (params.int("x")?, params.int("y")?);
                let on = params.bool_or("on", true)?;
                self.draw(params, |frame| frame.set(x as i32, y as i32, on))?;
                Ok(json!({ "x": x, "y": y, "on": on }))
            }
            "line" => {
                let [x1, y1, x2, y2] = corners(params)?;
                self.draw(params, |frame| frame.line(x1, y1, x2, y2))?;
                Ok(Value::Null)
            }
            "rect" => {
                let [x1, y1, x2, y2] = corners(params)?;
                let fill = params.bool_or("fill", false)?;
                self.draw(params, |frame| frame.rect(x1, y1, x2, y2, fill))?;
                Ok(Value::Null)
            }
            "ellipse" => {
                let [x1, y1, x2, y2] = corners(params)?;
                let fill = params.bool_or("fill", false)?;
                self.draw(params, |frame| frame.ellipse(x1, y1, x2, y2, fill))?;
                Ok(Value::Null)
            }
            "clear" => {
                self.draw(params, |frame| *frame = Frame::BLANK)?;
                self.set_expression(None);
                Ok(Value::Null)
            }
            "invert" => {
                self.draw(params, Frame::invert)?;
                Ok(Value::Null)
            }
            "brightness" => {
                let value = params.int("value")? as u8;
                self.panel().device.contrast(value)?;
                self.status().brightness = value;
                Ok(json!({ "brightness": value }))
            }
            "flush" => {
                self.panel().flush()?;
                Ok(Value::Null)
            }
            "sequence" => {
                let frames = parse_frames(params.list("frames")?)?;
                let repeat = params.bool_or("loop", false)?;
                let count = frames.len();

                self.set_expression(None);
                self.start_effect("sequence", Duration::ZERO, move |clock, show| {
                    expressions::play_sequence(&frames, repeat, clock, show)
                })?;
                Ok(json!({ "frames": count, "loop": repeat }))
            }
            _ => Err(ModuleError::UnknownAction {
                module: NAME.into(),
                action: action.into(),
            }),
        }
    }

    /// Stops any effect, edits the buffer and flushes unless `flush=false`.
    fn draw(&self, params: &Params, edit: impl FnOnce(&mut Frame)) -> Result<(), ModuleError> {
        let flush = params.bool_or("flush", true)?;
        self.effects.stop();
        self.panel().edit(flush, edit)?;
        Ok(())
    }
}

fn lock(panel: &Mutex<Panel>) -> MutexGuard<'_, Panel> {
    panel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn corners(params: &Params) -> Result<[i32; 4], ModuleError> {
    Ok([
        params.int("x1")? as i32,
        params.int("y1")? as i32,
        params.int("x2")? as i32,
        params.int("y2")? as i32,
    ])
}

fn parse_frames(raw: &[Value]) -> Result<Vec<(Frame, Duration)>, ModuleError> {
    if raw.is_empty() {
        return Err(ModuleError::Invalid("No frames provided".into()));
    }
    raw.iter()
        .enumerate()
        .map(|(i, entry)| {
            let grid = entry
                .get("grid")
                .ok_or_else(|| ModuleError::Invalid(format!("Frame {i} has no grid")))?;
            let ms = match entry.get("ms") {
                None | Some(Value::Null) => 200,
                Some(ms) => ms
                    .as_u64()
                    .filter(|&ms| ms >= 1)
                    .ok_or_else(|| ModuleError::Invalid(format!("Frame {i}: ms must be a positive integer")))?,
            };
            Ok((Frame::from_grid(grid)?, Duration::from_millis(ms)))
        })
        .collect()
}

fn coord(description: &'static str) -> ParamSpec {
    ParamSpec::required(ParamKind::Int)
        .range(0.0, COORD_MAX)
        .describe(description)
}

fn flush_param() -> ParamSpec {
    ParamSpec::with_default(ParamKind::Bool, true).describe("Push the buffer to the display")
}

fn shape(action: &'static str, description: &'static str, fillable: bool) -> ActionSpec {
    let spec = ActionSpec::new(action, description)
        .param("x1", coord("First corner column"))
        .param("y1", coord("First corner row"))
        .param("x2", coord("Second corner column"))
        .param("y2", coord("Second corner row"))
        .param("flush", flush_param());
    if fillable {
        spec.param(
            "fill",
            ParamSpec::with_default(ParamKind::Bool, false).describe("Fill the shape"),
        )
    } else {
        spec
    }
}

impl HardwareModule for FaceModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "8x8 LED matrix face with expressions, animations and free drawing"
    }

    fn init(&self) -> anyhow::Result<()> {
        let brightness = self.status().brightness;
        let mut panel = self.panel();
        panel.device.open(brightness)?;
        panel.buffer = Frame::BLANK;
        info!("LED matrix ready at brightness {brightness}");
        Ok(())
    }

    fn cleanup(&self) {
        self.effects.stop();
        if let Err(e) = self.panel().device.close() {
            warn!("Failed to blank the LED matrix: {e}");
        }
    }

    fn handle_command(&self, action: &str, params: &Params) -> Response {
        Response::from_result(self.run(action, params))
    }

    fn state(&self) -> Result<Value, ModuleError> {
        let status = self.status().clone();
        let animation = self.effects.current();
        Ok(json!({
            "current_expression": status.expression,
            "animation_running": animation.is_some(),
            "current_animation": animation,
            "brightness": status.brightness,
        }))
    }

    fn capabilities(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("expression", "Show a predefined expression").param(
                "name",
                ParamSpec::required(ParamKind::Str)
                    .options(expressions::expression_names())
                    .describe("Expression name"),
            ),
            ActionSpec::new("animate", "Play a looping animation in the background")
                .param(
                    "name",
                    ParamSpec::required(ParamKind::Str)
                        .options(Animation::ALL.map(Animation::name))
                        .describe("Animation name"),
                )
                .param(
                    "duration",
                    ParamSpec::with_default(ParamKind::Float, 0.0)
                        .range(0.0, 3600.0)
                        .describe("Seconds to play (0 = until stopped)"),
                ),
            ActionSpec::new("stop", "Stop the running animation"),
            ActionSpec::new("blink", "Close the eyes briefly, then restore the frame").param(
                "duration_ms",
                ParamSpec::with_default(ParamKind::Int, 150)
                    .range(10.0, 2000.0)
                    .describe("How long the eyes stay closed"),
            ),
            ActionSpec::new("custom", "Show an arbitrary bitmap").param(
                "grid",
                ParamSpec::required(ParamKind::Grid).describe("8 rows of 8 cells, 0 or 1"),
            ),
            ActionSpec::new("pixel", "Set a single pixel")
                .param("x", coord("Column"))
                .param("y", coord("Row"))
                .param(
                    "on",
                    ParamSpec::with_default(ParamKind::Bool, true).describe("Pixel state"),
                )
                .param("flush", flush_param()),
            shape("line", "Draw a line", false),
            shape("rect", "Draw a rectangle", true),
            shape("ellipse", "Draw an ellipse or circle", true),
            ActionSpec::new("clear", "Turn every pixel off").param("flush", flush_param()),
            ActionSpec::new("invert", "Invert every pixel").param("flush", flush_param()),
            ActionSpec::new("brightness", "Set display brightness").param(
                "value",
                ParamSpec::required(ParamKind::Int)
                    .range(0.0, 255.0)
                    .describe("0 (dim) to 255 (bright)"),
            ),
            ActionSpec::new("flush", "Push the drawing buffer to the display"),
            ActionSpec::new("sequence", "Play a custom frame sequence in the background")
                .param(
                    "frames",
                    ParamSpec::required(ParamKind::List)
                        .describe("List of {grid, ms} objects; ms defaults to 200"),
                )
                .param(
                    "loop",
                    ParamSpec::with_default(ParamKind::Bool, false).describe("Repeat forever"),
                ),
        ]
    }
}
