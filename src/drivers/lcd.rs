//! Character LCD (HD44780 behind the kernel `charlcd` driver).

pub mod device;
pub mod layout;
pub mod protocol;

use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{info, warn};
use serde_json::{Map, Value, json};

use crate::{
    config::{LcdBackend, LcdConfig},
    effect::EffectSlot,
    module::{HardwareModule, ModuleError},
    protocol::Response,
    schema::{ActionSpec, ParamKind, ParamSpec, Params},
};

use device::{CharLcd, TextDisplay, VirtualLcd};
use layout::Align;
use protocol::{Command, Direction};

const NAME: &str = "lcd";
const CURSOR_MODES: [&str; 3] = ["hide", "line", "blink"];

type SharedDisplay = Arc<Mutex<Box<dyn TextDisplay>>>;

#[derive(Debug, Clone)]
struct LcdStatus {
    lines: Vec<String>,
    backlight: bool,
    display_on: bool,
    cursor_mode: &'static str,
    custom_chars: BTreeMap<u8, [u8; 8]>,
}

impl LcdStatus {
    fn new(rows: usize) -> Self {
        Self {
            lines: vec![String::new(); rows],
            backlight: true,
            display_on: true,
            cursor_mode: "hide",
            custom_chars: BTreeMap::new(),
        }
    }
}

pub struct LcdModule {
    display: SharedDisplay,
    status: Mutex<LcdStatus>,
    effects: EffectSlot,
    cols: usize,
    rows: usize,
}

impl LcdModule {
    pub fn new(
        display: Box<dyn TextDisplay>,
        cols: usize,
        rows: usize,
        join_timeout: Duration,
    ) -> Self {
        Self {
            display: Arc::new(Mutex::new(display)),
            status: Mutex::new(LcdStatus::new(rows)),
            effects: EffectSlot::new(NAME, join_timeout),
            cols,
            rows,
        }
    }

    pub fn from_config(config: &LcdConfig, join_timeout: Duration) -> Self {
        let display: Box<dyn TextDisplay> = match config.backend {
            LcdBackend::Virtual => Box::new(VirtualLcd::new(config.cols, config.rows)),
            LcdBackend::Charlcd => Box::new(CharLcd::new(&config.device)),
        };
        Self::new(display, config.cols, config.rows, join_timeout)
    }

    fn status(&self) -> MutexGuard<'_, LcdStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, commands: &[Command]) -> io::Result<()> {
        send_all(&self.display, commands)
    }

    fn run(&self, action: &str, params: &Params) -> Result<Value, ModuleError> {
        match action {
            "write" => {
                let align = Align::from_name(params.str_or("align", "left")?)
                    .unwrap_or(Align::Left);
                let text = [params.str("line1")?, params.str_or("line2", "")?];
                let lines: Vec<String> = (0..self.rows)
                    .map(|row| layout::align(text.get(row).copied().unwrap_or(""), self.cols, align))
                    .collect();

                self.effects.stop();
                let mut commands = vec![Command::Clear];
                for (row, line) in lines.iter().enumerate().take(text.len()) {
                    commands.push(Command::Goto { col: 0, row });
                    commands.push(Command::Text(line.clone()));
                }
                self.send(&commands)?;
                self.status().lines = lines;
                Ok(self.lines_json())
            }
            "scroll" => {
                let text = params.str("text")?.to_string();
                let row = params.int_or("row", 0)? as usize;
                let delay = Duration::from_secs_f64(params.float_or("delay", 0.3)?);

                let display = Arc::clone(&self.display);
                let cols = self.cols;
                let shown = text.clone();
                self.effects.start("scroll", move |stop| {
                    for window in layout::scroll_windows(&text, cols) {
                        let frame = [Command::Goto { col: 0, row }, Command::Text(window)];
                        if let Err(e) = send_all(&display, &frame) {
                            warn!("lcd scroll aborted: {e}");
                            return;
                        }
                        if stop.wait_timeout(delay) {
                            return;
                        }
                    }
                })?;
                Ok(json!({ "scrolling": shown, "row": row }))
            }
            "progress" => {
                let percentage = params.int("percentage")? as u8;
                let label = params.str_or("label", "")?;
                let bar = layout::progress_bar(percentage, self.cols);
                let bar_row = self.rows.min(2) - 1;

                self.effects.stop();
                let mut commands = vec![Command::Clear];
                let mut lines = vec![String::new(); self.rows];
                if bar_row > 0 && !label.is_empty() {
                    commands.push(Command::Text(layout::align(label, self.cols, Align::Center)));
                    lines[0] = layout::truncate(label, self.cols);
                }
                commands.push(Command::Goto { col: 0, row: bar_row });
                commands.push(Command::Text(bar.clone()));
                lines[bar_row] = bar.clone();
                self.send(&commands)?;
                self.status().lines = lines;
                Ok(json!({ "percentage": percentage, "bar": bar }))
            }
            "write_at" => {
                let row = params.int("row")? as usize;
                let col = params.int("col")? as usize;
                let text = params.str("text")?;
                let visible = layout::truncate(text, self.cols - col);

                self.effects.stop();
                self.send(&[Command::Goto { col, row }, Command::Text(visible)])?;
                let mut status = self.status();
                status.lines[row] = layout::overlay(&status.lines[row], col, text, self.cols);
                Ok(json!({ "row": row, "col": col, "text": text }))
            }
            "clear" => {
                self.effects.stop();
                self.send(&[Command::Clear])?;
                self.status().lines = vec![String::new(); self.rows];
                Ok(Value::Null)
            }
            "home" => {
                self.send(&[Command::Home])?;
                Ok(Value::Null)
            }
            "cursor" => {
                let row = params.int("row")? as usize;
                let col = params.int("col")? as usize;
                self.send(&[Command::Goto { col, row }])?;
                Ok(json!({ "row": row, "col": col }))
            }
            "cursor_mode" => {
                let mode = params.str("mode")?;
                let mode = CURSOR_MODES
                    .into_iter()
                    .find(|m| *m == mode)
                    .ok_or_else(|| {
                        ModuleError::Invalid(format!(
                            "Invalid cursor mode '{mode}'. Use: hide, line, blink"
                        ))
                    })?;
                self.send(&[Command::Cursor(mode == "line"), Command::Blink(mode == "blink")])?;
                self.status().cursor_mode = mode;
                Ok(json!({ "cursor_mode": mode }))
            }
            "display" => {
                let on = params.bool("on")?;
                self.send(&[Command::Display(on)])?;
                self.status().display_on = on;
                Ok(json!({ "display_on": on }))
            }
            "backlight" => {
                let on = params.bool("on")?;
                self.send(&[Command::Backlight(on)])?;
                self.status().backlight = on;
                Ok(json!({ "backlight": on }))
            }
            "shift" => {
                let amount = params.int("amount")?;
                let direction = if amount < 0 {
                    Direction::Left
                } else {
                    Direction::Right
                };
                let commands = vec![Command::Shift(direction); amount.unsigned_abs() as usize];
                self.send(&commands)?;
                Ok(json!({ "shifted": amount }))
            }
            "create_char" => {
                let slot = params.int("slot")? as u8;
                let rows = glyph_rows(params.list("bitmap")?)?;
                self.send(&[Command::Glyph { slot, rows }])?;
                self.status().custom_chars.insert(slot, rows);
                Ok(json!({ "slot": slot, "bitmap": rows }))
            }
            "write_char" => {
                let slot = params.int("slot")? as u8;
                self.send(&[Command::Custom(slot)])?;
                Ok(json!({ "slot": slot }))
            }
            "stop_scroll" => {
                self.effects.stop();
                Ok(Value::Null)
            }
            _ => Err(ModuleError::UnknownAction {
                module: NAME.into(),
                action: action.into(),
            }),
        }
    }

    fn lines_json(&self) -> Value {
        let status = self.status();
        let mut lines = Map::new();
        for (i, line) in status.lines.iter().enumerate() {
            lines.insert(format!("line{}", i + 1), Value::from(line.as_str()));
        }
        Value::Object(lines)
    }

    fn row_param(&self) -> ParamSpec {
        ParamSpec::required(ParamKind::Int).range(0.0, (self.rows - 1) as f64)
    }

    fn col_param(&self) -> ParamSpec {
        ParamSpec::required(ParamKind::Int).range(0.0, (self.cols - 1) as f64)
    }
}

fn send_all(display: &Mutex<Box<dyn TextDisplay>>, commands: &[Command]) -> io::Result<()> {
    let mut display = display
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    commands.iter().try_for_each(|command| display.send(command))
}

fn glyph_rows(bitmap: &[Value]) -> Result<[u8; 8], ModuleError> {
    let shape = || ModuleError::Invalid("Bitmap must be a list of 8 integers (each 0-31)".into());
    if bitmap.len() != 8 {
        return Err(shape());
    }
    let mut rows = [0u8; 8];
    for (row, value) in rows.iter_mut().zip(bitmap) {
        *row = value
            .as_u64()
            .filter(|&v| v <= 0x1F)
            .ok_or_else(shape)? as u8;
    }
    Ok(rows)
}

fn slot_param() -> ParamSpec {
    ParamSpec::required(ParamKind::Int)
        .range(0.0, 7.0)
        .describe("CGRAM slot")
}

impl HardwareModule for LcdModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Character LCD with alignment, scrolling, progress bars and custom characters"
    }

    fn init(&self) -> anyhow::Result<()> {
        let mut display = self
            .display
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        display.open()?;
        for command in [
            Command::Clear,
            Command::Display(true),
            Command::Cursor(false),
            Command::Blink(false),
            Command::Backlight(true),
        ] {
            display.send(&command)?;
        }
        drop(display);

        *self.status() = LcdStatus::new(self.rows);
        info!("LCD ready ({}x{})", self.cols, self.rows);
        Ok(())
    }

    fn cleanup(&self) {
        self.effects.stop();
        if let Err(e) = self.send(&[Command::Clear, Command::Backlight(false)]) {
            warn!("Failed to blank the LCD: {e}");
        }
        let mut display = self
            .display
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = display.close() {
            warn!("Failed to close the LCD: {e}");
        }
    }

    fn handle_command(&self, action: &str, params: &Params) -> Response {
        Response::from_result(self.run(action, params))
    }

    fn state(&self) -> Result<Value, ModuleError> {
        let mut state = match self.lines_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let status = self.status().clone();
        state.insert("backlight".into(), status.backlight.into());
        state.insert("display_on".into(), status.display_on.into());
        state.insert("cursor_mode".into(), status.cursor_mode.into());
        state.insert(
            "custom_chars".into(),
            json!(status.custom_chars.keys().collect::<Vec<_>>()),
        );
        state.insert("scrolling".into(), self.effects.is_running().into());
        Ok(Value::Object(state))
    }

    fn capabilities(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("write", "Clear the screen and write up to two lines")
                .param(
                    "line1",
                    ParamSpec::required(ParamKind::Str).describe("Text for row 1"),
                )
                .param(
                    "line2",
                    ParamSpec::with_default(ParamKind::Str, "").describe("Text for row 2"),
                )
                .param(
                    "align",
                    ParamSpec::with_default(ParamKind::Str, "left")
                        .options(Align::NAMES)
                        .describe("Text alignment"),
                ),
            ActionSpec::new("scroll", "Slide text across one row in the background")
                .param("text", ParamSpec::required(ParamKind::Str))
                .param(
                    "row",
                    ParamSpec::with_default(ParamKind::Int, 0).range(0.0, (self.rows - 1) as f64),
                )
                .param(
                    "delay",
                    ParamSpec::with_default(ParamKind::Float, 0.3)
                        .range(0.05, 5.0)
                        .describe("Seconds between shifts"),
                ),
            ActionSpec::new("progress", "Show a progress bar with an optional label")
                .param(
                    "percentage",
                    ParamSpec::required(ParamKind::Int).range(0.0, 100.0),
                )
                .param(
                    "label",
                    ParamSpec::with_default(ParamKind::Str, "").describe("Text above the bar"),
                ),
            ActionSpec::new("write_at", "Write text at a position without clearing")
                .param("row", self.row_param())
                .param("col", self.col_param())
                .param("text", ParamSpec::required(ParamKind::Str)),
            ActionSpec::new("clear", "Clear the screen"),
            ActionSpec::new("home", "Move the cursor to the top-left corner"),
            ActionSpec::new("cursor", "Move the cursor")
                .param("row", self.row_param())
                .param("col", self.col_param()),
            ActionSpec::new("cursor_mode", "Set the cursor style").param(
                "mode",
                ParamSpec::required(ParamKind::Str).options(CURSOR_MODES),
            ),
            ActionSpec::new("display", "Show or hide the contents").param(
                "on",
                ParamSpec::required(ParamKind::Bool),
            ),
            ActionSpec::new("backlight", "Switch the backlight").param(
                "on",
                ParamSpec::required(ParamKind::Bool),
            ),
            ActionSpec::new("shift", "Shift the whole display").param(
                "amount",
                ParamSpec::required(ParamKind::Int)
                    .range(-40.0, 40.0)
                    .describe("Positive shifts right, negative left"),
            ),
            ActionSpec::new("create_char", "Define a custom character")
                .param("slot", slot_param())
                .param(
                    "bitmap",
                    ParamSpec::required(ParamKind::List)
                        .describe("8 rows, each 0-31 (5 pixels wide)"),
                ),
            ActionSpec::new("write_char", "Print a custom character at the cursor")
                .param("slot", slot_param()),
            ActionSpec::new("stop_scroll", "Stop scrolling text"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::invoke;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn lcd() -> (LcdModule, VirtualLcd) {
        let screen = VirtualLcd::new(16, 2);
        let module = LcdModule::new(Box::new(screen.clone()), 16, 2, Duration::from_secs(1));
        module.init().unwrap();
        (module, screen)
    }

    fn call(module: &LcdModule, action: &str, params: Value) -> Response {
        invoke(module, action, params.as_object().unwrap())
    }

    #[test]
    fn init_lights_the_screen() {
        let (lcd, screen) = lcd();
        let screen = screen.snapshot();
        assert!(screen.open);
        assert!(screen.backlight);
        assert_eq!(lcd.state().unwrap()["cursor_mode"], "hide");
    }

    #[test]
    fn write_aligns_both_lines() {
        let (lcd, screen) = lcd();
        let response = call(&lcd, "write", json!({"line1": "Hello", "line2": "World", "align": "center"}));
        assert_eq!(
            response,
            Response::ok(json!({"line1": "     Hello      ", "line2": "     World      "}))
        );
        let screen = screen.snapshot();
        assert_eq!(screen.line(0), "     Hello      ");
        assert_eq!(screen.line(1), "     World      ");
        assert_eq!(lcd.state().unwrap()["line1"], "     Hello      ");
    }

    #[test]
    fn long_text_is_truncated() {
        let (lcd, screen) = lcd();
        call(&lcd, "write", json!({"line1": "This line is far too long"}));
        assert_eq!(screen.snapshot().line(0), "This line is far");
    }

    #[test]
    fn invalid_alignment_is_rejected() {
        let (lcd, _) = lcd();
        assert!(!call(&lcd, "write", json!({"line1": "x", "align": "justify"})).ok);
    }

    #[test]
    fn progress_renders_label_and_bar() {
        let (lcd, screen) = lcd();
        let response = call(&lcd, "progress", json!({"percentage": 50, "label": "Loading"}));
        assert_eq!(
            response,
            Response::ok(json!({"percentage": 50, "bar": "[#######-------]"}))
        );
        let screen = screen.snapshot();
        assert_eq!(screen.line(0).trim(), "Loading");
        assert_eq!(screen.line(1), "[#######-------]");
        assert_eq!(lcd.state().unwrap()["line2"], "[#######-------]");

        assert!(!call(&lcd, "progress", json!({"percentage": 101})).ok);
    }

    #[test]
    fn write_at_overlays_text() {
        let (lcd, screen) = lcd();
        call(&lcd, "write", json!({"line1": "abcdef"}));
        let response = call(&lcd, "write_at", json!({"row": 0, "col": 2, "text": "XY"}));
        assert_eq!(response, Response::ok(json!({"row": 0, "col": 2, "text": "XY"})));
        assert_eq!(screen.snapshot().line(0), "abXYef          ");
        assert_eq!(lcd.state().unwrap()["line1"], "abXYef          ");

        assert!(!call(&lcd, "write_at", json!({"row": 2, "col": 0, "text": "x"})).ok);
        assert!(!call(&lcd, "write_at", json!({"row": 0, "col": 16, "text": "x"})).ok);
    }

    #[test]
    fn scroll_runs_in_background_until_stopped() {
        let (lcd, screen) = lcd();
        let response = call(&lcd, "scroll", json!({"text": "Breaking news", "row": 1, "delay": 0.05}));
        assert_eq!(response, Response::ok(json!({"scrolling": "Breaking news", "row": 1})));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(lcd.state().unwrap()["scrolling"], true);
        assert_ne!(screen.snapshot().line(1), " ".repeat(16));

        assert_eq!(call(&lcd, "stop_scroll", json!({})), Response::ok_empty());
        assert_eq!(lcd.state().unwrap()["scrolling"], false);
    }

    #[test]
    fn write_cancels_scroll() {
        let (lcd, screen) = lcd();
        call(&lcd, "scroll", json!({"text": "marquee", "delay": 0.05}));
        thread::sleep(Duration::from_millis(30));
        call(&lcd, "write", json!({"line1": "static"}));
        assert_eq!(lcd.state().unwrap()["scrolling"], false);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(screen.snapshot().line(0), "static          ");
    }

    #[test]
    fn cursor_and_display_flags() {
        let (lcd, screen) = lcd();
        call(&lcd, "cursor_mode", json!({"mode": "blink"}));
        call(&lcd, "display", json!({"on": false}));
        call(&lcd, "backlight", json!({"on": "off"}));
        let snapshot = screen.snapshot();
        assert!(snapshot.blink);
        assert!(!snapshot.cursor_visible);
        assert!(!snapshot.display_on);
        assert!(!snapshot.backlight);

        let state = lcd.state().unwrap();
        assert_eq!(state["cursor_mode"], "blink");
        assert_eq!(state["display_on"], false);
        assert_eq!(state["backlight"], false);
        assert!(!call(&lcd, "cursor_mode", json!({"mode": "block"})).ok);
    }

    #[test]
    fn cursor_and_home_move_the_cursor() {
        let (lcd, screen) = lcd();
        call(&lcd, "cursor", json!({"row": 1, "col": 4}));
        assert_eq!(screen.snapshot().cursor, (4, 1));
        call(&lcd, "home", json!({}));
        assert_eq!(screen.snapshot().cursor, (0, 0));
    }

    #[test]
    fn shift_moves_display() {
        let (lcd, screen) = lcd();
        assert_eq!(
            call(&lcd, "shift", json!({"amount": -3})),
            Response::ok(json!({"shifted": -3}))
        );
        assert_eq!(screen.snapshot().shift, -3);
    }

    #[test]
    fn custom_characters() {
        let (lcd, screen) = lcd();
        let heart = json!([0, 10, 31, 31, 14, 4, 0, 0]);
        let response = call(&lcd, "create_char", json!({"slot": 1, "bitmap": heart}));
        assert_eq!(response, Response::ok(json!({"slot": 1, "bitmap": heart})));
        call(&lcd, "write_char", json!({"slot": 1}));

        let snapshot = screen.snapshot();
        assert_eq!(snapshot.glyphs[1], Some([0, 10, 31, 31, 14, 4, 0, 0]));
        assert_eq!(snapshot.cells[0][0], 1);
        assert_eq!(lcd.state().unwrap()["custom_chars"], json!([1]));

        assert!(!call(&lcd, "create_char", json!({"slot": 8, "bitmap": heart})).ok);
        assert!(!call(&lcd, "create_char", json!({"slot": 0, "bitmap": [32, 0, 0, 0, 0, 0, 0, 0]})).ok);
        assert!(!call(&lcd, "create_char", json!({"slot": 0, "bitmap": [1, 2]})).ok);
    }

    #[test]
    fn clear_empties_lines() {
        let (lcd, screen) = lcd();
        call(&lcd, "write", json!({"line1": "bye"}));
        call(&lcd, "clear", json!({}));
        assert_eq!(screen.snapshot().line(0), " ".repeat(16));
        assert_eq!(lcd.state().unwrap()["line1"], "");
    }

    #[test]
    fn cleanup_turns_off_backlight() {
        let (lcd, screen) = lcd();
        lcd.cleanup();
        let snapshot = screen.snapshot();
        assert!(!snapshot.backlight);
        assert!(!snapshot.open);
    }
}
