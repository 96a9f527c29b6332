use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use super::protocol::{self, Command, Direction};

/// Sink for [`Command`]s.
pub trait TextDisplay: Send + 'static {
    fn open(&mut self) -> io::Result<()>;
    fn send(&mut self, command: &Command) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

/// Character LCD exposed by the kernel `charlcd` driver.
pub struct CharLcd {
    path: PathBuf,
    port: Option<File>,
}

impl CharLcd {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            port: None,
        }
    }
}

impl TextDisplay for CharLcd {
    fn open(&mut self) -> io::Result<()> {
        let port = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", self.path.display())))?;
        self.port = Some(port);
        Ok(())
    }

    fn send(&mut self, command: &Command) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "LCD is not open"))?;
        port.write_all(&command.to_bytes())?;
        port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.port = None;
        Ok(())
    }
}

/// Contents of an emulated LCD.
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub cells: Vec<Vec<u8>>,
    pub cursor: (usize, usize),
    pub display_on: bool,
    pub backlight: bool,
    pub cursor_visible: bool,
    pub blink: bool,
    /// Net display shift, positive to the right.
    pub shift: i32,
    pub glyphs: [Option<[u8; 8]>; 8],
    pub open: bool,
}

impl Screen {
    fn new(cols: usize, rows: usize) -> Self {
        Self {
            cells: vec![vec![b' '; cols]; rows],
            cursor: (0, 0),
            display_on: true,
            backlight: true,
            cursor_visible: false,
            blink: false,
            shift: 0,
            glyphs: [None; 8],
            open: false,
        }
    }

    /// Row text, with custom characters shown as `\0`..`\7`.
    pub fn line(&self, row: usize) -> String {
        self.cells
            .get(row)
            .map(|cells| cells.iter().map(|&b| char::from(b)).collect())
            .unwrap_or_default()
    }

    fn put(&mut self, byte: u8) {
        let (col, row) = self.cursor;
        if let Some(cell) = self.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = byte;
        }
        self.cursor.0 += 1;
    }

    fn apply(&mut self, command: &Command) {
        match command {
            Command::Clear => {
                for row in &mut self.cells {
                    row.fill(b' ');
                }
                self.cursor = (0, 0);
                self.shift = 0;
            }
            Command::Home => {
                self.cursor = (0, 0);
                self.shift = 0;
            }
            Command::Goto { col, row } => self.cursor = (*col, *row),
            Command::Display(on) => self.display_on = *on,
            Command::Cursor(on) => self.cursor_visible = *on,
            Command::Blink(on) => self.blink = *on,
            Command::Backlight(on) => self.backlight = *on,
            Command::Shift(Direction::Left) => self.shift -= 1,
            Command::Shift(Direction::Right) => self.shift += 1,
            Command::Glyph { slot, rows } => self.glyphs[usize::from(slot & 0x07)] = Some(*rows),
            Command::Text(text) => protocol::encode(text).into_iter().for_each(|b| self.put(b)),
            Command::Custom(slot) => self.put(slot & 0x07),
        }
    }
}

/// In-memory LCD for headless runs. Clones share the same screen.
#[derive(Debug, Clone)]
pub struct VirtualLcd {
    screen: Arc<Mutex<Screen>>,
}

impl VirtualLcd {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            screen: Arc::new(Mutex::new(Screen::new(cols, rows))),
        }
    }

    pub fn snapshot(&self) -> Screen {
        self.screen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_screen(&self, f: impl FnOnce(&mut Screen)) {
        let mut screen = self
            .screen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *screen);
    }
}

impl TextDisplay for VirtualLcd {
    fn open(&mut self) -> io::Result<()> {
        self.with_screen(|screen| screen.open = true);
        Ok(())
    }

    fn send(&mut self, command: &Command) -> io::Result<()> {
        self.with_screen(|screen| screen.apply(command));
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.with_screen(|screen| screen.open = false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn charlcd_receives_escape_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lcd");
        fs::write(&path, b"").unwrap();

        let mut lcd = CharLcd::new(&path);
        assert!(lcd.send(&Command::Clear).is_err());
        lcd.open().unwrap();
        lcd.send(&Command::Clear).unwrap();
        lcd.send(&Command::Text("Hi".into())).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"\x0cHi".to_vec());
    }

    #[test]
    fn emulated_screen_tracks_text_and_cursor() {
        let lcd = VirtualLcd::new(8, 2);
        let mut device = lcd.clone();
        device.send(&Command::Text("Hello world".into())).unwrap();
        device.send(&Command::Goto { col: 2, row: 1 }).unwrap();
        device.send(&Command::Custom(3)).unwrap();

        let screen = lcd.snapshot();
        assert_eq!(screen.line(0), "Hello wo");
        assert_eq!(screen.line(1), "  \u{3}     ");
        assert_eq!(screen.cursor, (3, 1));

        device.send(&Command::Clear).unwrap();
        assert_eq!(lcd.snapshot().line(0), "        ");
    }
}
